use std::sync::Arc;

use cabinetdb::{Connection, Database};
use tempfile::TempDir;

pub struct TestDb {
    _dir: TempDir,
    pub db: Arc<Database>,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::builder()
            .path(dir.path().join("test.cabinet"))
            .open()
            .expect("open database");
        TestDb { _dir: dir, db }
    }

    pub fn conn(&self) -> Connection {
        self.db.new_connection().expect("new connection")
    }
}
