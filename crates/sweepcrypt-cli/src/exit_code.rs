//! Exit codes for the CLI.
//!
//! These follow common Unix conventions and provide meaningful
//! status information for scripting and automation.

/// Successful execution
pub const SUCCESS: u8 = 0;

/// General/unspecified error
pub const GENERAL_ERROR: u8 = 1;

/// Command-line usage error (bad arguments, malformed folder or job id)
pub const USAGE_ERROR: u8 = 2;

/// The actor may not start or continue this job
pub const PERMISSION_DENIED: u8 = 5;

/// Job or folder not found
pub const NOT_FOUND: u8 = 7;

/// Another job is already active on the folder or an ancestor
pub const CONFLICT: u8 = 9;

/// A file could not be encrypted or decrypted
pub const TRANSFORM_FAILED: u8 = 10;

/// Job or folder state could not be read or written
pub const PERSISTENCE_FAILED: u8 = 11;
