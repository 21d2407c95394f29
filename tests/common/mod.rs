#![allow(dead_code)]

use practice_messaging::libs::core::models::{Participant, ParticipantId, ParticipantRole};
use practice_messaging::{Messaging, MessagingConfig};
use tempfile::TempDir;

/// One messaging instance over a throwaway database. The temp directory
/// lives as long as the app so the file is cleaned up after the test.
pub struct TestApp {
    pub messaging: Messaging,
    db_path: String,
    _dir: TempDir,
}

impl TestApp {
    /// Drops the current instance (flushing the notification worker) and
    /// opens a fresh one over the same database file.
    pub fn reopen(self) -> TestApp {
        let TestApp {
            messaging,
            db_path,
            _dir,
        } = self;
        drop(messaging);
        let messaging =
            Messaging::open(MessagingConfig::new(db_path.clone())).expect("reopen database");
        TestApp {
            messaging,
            db_path,
            _dir,
        }
    }
}

pub fn open_messaging() -> TestApp {
    open_with(|_| {})
}

pub fn open_with(configure: impl FnOnce(&mut MessagingConfig)) -> TestApp {
    let dir = TempDir::new().expect("create temp dir");
    let db_path = dir
        .path()
        .join("messaging.db")
        .to_str()
        .expect("utf-8 temp path")
        .to_owned();
    let mut config = MessagingConfig::new(db_path.clone());
    configure(&mut config);
    let messaging = Messaging::open(config).expect("open database");
    TestApp {
        messaging,
        db_path,
        _dir: dir,
    }
}

pub fn staff() -> Participant {
    Participant::new(ParticipantId::new(), ParticipantRole::Staff)
}

pub fn client() -> Participant {
    Participant::new(ParticipantId::new(), ParticipantRole::Client)
}
