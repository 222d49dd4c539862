//! Backup coordination
//!
//! - `entity`: backup, backup set and verification records with their state rules
//! - `checksum`: SHA-256 of backup artifacts
//! - `repository`: audited persistence of the above

pub mod checksum;
pub mod entity;
pub mod repository;

pub use checksum::{checksum_bytes, checksum_file, verify_file};
pub use entity::{
    BACKUP_SET_TABLE, BACKUP_TABLE, BACKUP_VERIFICATION_TABLE, Backup, BackupCompletion, BackupSet,
    BackupSetStatus, BackupStatus, BackupType, BackupVerification, VerificationChecks, VerificationStatus,
};
pub use repository::BackupRepository;
