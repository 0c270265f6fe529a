//! OBD-II and ELM327 constants.

// ── OBD-II Modes ────────────────────────────────────────────────

/// Mode 01: Show current data (live PIDs).
pub const MODE_CURRENT_DATA: u8 = 0x01;

/// Mode 09: Request vehicle information (VIN, etc.).
pub const MODE_VEHICLE_INFO: u8 = 0x09;

/// Offset added to request mode to get response SID.
pub const RESPONSE_SID_OFFSET: u8 = 0x40;

/// ELM327 accepts at most six PIDs in one mode 01 request.
pub const MAX_BATCH_PIDS: usize = 6;

// ── ISO-TP frame type nibbles (upper nibble of the PCI byte) ──

/// Single Frame.
pub const ISOTP_SF: u8 = 0x0;
/// First Frame.
pub const ISOTP_FF: u8 = 0x1;
/// Consecutive Frame.
pub const ISOTP_CF: u8 = 0x2;

/// Data bytes carried by a First Frame on classic CAN.
pub const ISOTP_FF_DATA: usize = 6;
/// Data bytes carried by a Consecutive Frame on classic CAN.
pub const ISOTP_CF_DATA: usize = 7;

/// Data bytes per line of a mode 09 answer on J1850, ISO 9141 and KWP,
/// each line being `49 <pid> <seq> d d d d`.
pub const LEGACY_INFO_CHUNK: usize = 4;

// ── Adapter line protocol ─────────────────────────────────────

/// Prompt character terminating every adapter reply.
pub const PROMPT: u8 = b'>';

/// Terminator appended to every command.
pub const COMMAND_TERMINATOR: &str = "\r";
