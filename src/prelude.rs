//! Convenient imports for cabinetdb.
//!
//! ```ignore
//! use cabinetdb::prelude::*;
//!
//! let db = Database::open("./store.db")?;
//! let mut conn = db.new_connection()?;
//! ```

pub use crate::{Connection, Database, DatabaseBuilder};

pub use crate::{Error, Result};

pub use crate::{ChangeSet, CollectionKey, ObserverId, Snapshot, Value};

pub use std::ops::ControlFlow;
