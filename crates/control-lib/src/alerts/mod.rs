//! Categorised, size-bounded alert journal shared by the control loops

mod journal;

pub use journal::{
    Alert, AlertCategory, AlertJournal, AlertSeverity, JournalConfig, DEFAULT_MAX_ALERTS,
};
