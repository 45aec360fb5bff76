//! Wire-level constants for the Canoe123 timing-engine protocol.
//!
//! The engine speaks UTF-8 XML over three transports: a `|`-delimited TCP
//! stream, unframed UDP datagrams, and a shared on-disk file. All three
//! carry documents rooted in `<Canoe123 ...>` (the live streams) or
//! `<Canoe123Data ...>` (the file-backed database).

/// Delimiter separating frames on the TCP stream. Frames never contain it.
pub const FRAME_DELIMITER: u8 = b'|';

/// Default ceiling on a single frame's size before it is reported as an error.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Magic prefix every live-stream document (TCP or UDP) must start with.
pub const ENGINE_MAGIC_PREFIX: &str = "<Canoe123";

/// Root element of the shared XML database file.
pub const XML_DB_ROOT: &str = "Canoe123Data";

/// Default UDP announce port.
pub const DEFAULT_UDP_PORT: u16 = 27333;

/// Default HTTP/WS listener port.
pub const DEFAULT_HTTP_PORT: u16 = 27123;

/// Discovery timeout: how long `UdpAnnouncer` waits for a first valid
/// datagram before emitting `timeout`.
pub const DISCOVERY_TIMEOUT_SECS: u64 = 30;

/// `TcpSource` reconnect backoff: initial delay, multiplier, cap.
pub const BACKOFF_INITIAL: std::time::Duration = std::time::Duration::from_secs(1);
pub const BACKOFF_MULTIPLIER: u32 = 2;
pub const BACKOFF_CAP: std::time::Duration = std::time::Duration::from_secs(30);

/// Default `FileWatcher` poll interval when falling back to polling mode.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Default debounce window collapsing a flurry of file-change events into one.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// The four top-level XML sections `ChangeDetector` hashes independently.
pub const XML_CHANGE_SECTIONS: [&str; 4] = ["Participants", "Schedule", "Results", "Classes"];

/// Top-level XML element names `XmlDecoder` recognizes.
pub mod elements {
    pub const TIME_OF_DAY: &str = "TimeOfDay";
    pub const ON_COURSE: &str = "OnCourse";
    pub const RESULTS: &str = "Results";
    pub const RACE_CONFIG: &str = "RaceConfig";
    pub const SCHEDULE: &str = "Schedule";
    pub const ROW: &str = "Row";
    pub const RACE: &str = "Race";
    pub const PARTICIPANT: &str = "Participant";
    pub const RESULT: &str = "Result";
}

/// The two competition runs tracked by `mergedResults`.
pub const RUN_BR1: &str = "BR1";
pub const RUN_BR2: &str = "BR2";

/// Sentinel substring marking a schedule entry's `raceId` as unassigned; such
/// entries are filtered out of the `schedule` projection (§4.7).
pub const UNASSIGNED_RACE_SENTINEL: &str = "unassigned";

/// Prefix matched (case-sensitively) against sibling directory names under
/// the engine's settings root when `ConfigLocator` hunts for its config
/// directory (§4.8).
pub const ENGINE_SETTINGS_DIR_PREFIX: &str = "Canoe123";

/// Filename of the engine's per-install settings document, searched for
/// inside each candidate settings directory.
pub const ENGINE_USER_CONFIG_FILENAME: &str = "user.config";

/// `.NET`-style setting keys `ConfigLocator` extracts from `user.config`.
pub const SETTING_CURRENT_EVENT_FILE: &str = "CurrentEventFile";
pub const SETTING_AUTO_COPY_FOLDER: &str = "AutoCopyFolder";

/// Default interval at which `ConfigLocator`'s monitor task re-runs detection.
pub const DEFAULT_CONFIG_LOCATOR_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

/// External-publisher pacing (§5): `XmlChange` and per-race `Results` pushes
/// are debounced (quiet-period coalescing), `OnCourse` is throttled (rate
/// limited, excess dropped).
pub const PUBLISHER_XML_CHANGE_DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(2);
pub const PUBLISHER_RESULTS_DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(1);
pub const PUBLISHER_ON_COURSE_MIN_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// Consecutive external-publish failures before the circuit opens, and how
/// long it stays open before the next attempt half-opens it.
pub const CIRCUIT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const CIRCUIT_BREAKER_OPEN_DURATION: std::time::Duration = std::time::Duration::from_secs(30);

/// Does `data` begin with the engine's magic prefix (ignoring leading
/// whitespace, which a file or socket read may incidentally include)?
pub fn has_magic_prefix(data: &str) -> bool {
    data.trim_start().starts_with(ENGINE_MAGIC_PREFIX)
}
