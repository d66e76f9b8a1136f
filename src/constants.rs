// -
// Reserved property names

/// Pseudo-channel the server uses to report registration failures.
pub const ERROR_PROPERTY: &str = "error";

/// Console text stream.
pub const CONSOLE_PROPERTY: &str = "output/tty";

/// Writing `0` here stops a running count on every scaler.
pub const STOP_COUNTING_PROPERTY: &str = "scaler/.all./count";

/// Variable holding the number of counters defined on the server.
pub(crate) const COUNTERS_VARIABLE: &str = "COUNTERS";

/// Console prompt terminator; marks the end of one command's output.
pub(crate) const CONSOLE_PROMPT_SUFFIX: &str = "> \n";

pub fn variable_property(name: &str) -> String {
    format!("var/{name}")
}

pub fn scaler_value_property(mnemonic: &str) -> String {
    format!("scaler/{mnemonic}/value")
}

// -
// Wire header (protocol version 4)

pub(crate) const SV_SPEC_MAGIC: u32 = 4277009102;
pub(crate) const SV_PROTOCOL_VERSION: i32 = 4;
pub(crate) const SV_NAME_LEN: usize = 80;
/// 13 four-byte fields followed by the NUL-padded name.
pub(crate) const SV_HEADER_SIZE: usize = 13 * 4 + SV_NAME_LEN;
/// Largest header accepted on decode. Later protocol versions append a
/// few fields; anything past this is a corrupt frame.
pub(crate) const SV_MAX_HEADER_SIZE: usize = 4 * 1024;
/// magic + version + size: enough to know how long the header is.
pub(crate) const SV_HEADER_PREFIX: usize = 12;
