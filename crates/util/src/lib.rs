//! Shared utilities for the rigger workspace: content fingerprinting,
//! secret redaction, shell quoting, duration parsing, and the persisted
//! transfer ledger.

pub mod duration;
pub mod fingerprint;
pub mod ledger;
pub mod redact;
pub mod shell;

pub use duration::parse_duration;
pub use fingerprint::Fingerprint;
pub use ledger::{JsonFileLedger, LedgerError, MemoryLedger, TransferKey, TransferLedger, TransferRecord};
pub use redact::{redact_sensitive, SecretString, REDACTED_PLACEHOLDER};
pub use shell::{quote_arg, shell_line};
