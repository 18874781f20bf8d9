#![allow(dead_code)]

use bson::oid::ObjectId;
use docbridge::{Context, Journal, MemoryDriver, PersistentObject, Server};
use serde::{Deserialize, Serialize};

pub const PEOPLE: &str = "people";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub age: i32,
    #[serde(default)]
    pub journal: Journal,
}

impl Person {
    pub fn new(name: &str, age: i32) -> Self {
        Self { id: ObjectId::new(), name: name.to_string(), age, journal: Journal::new() }
    }
}

impl PersistentObject for Person {
    fn id(&self) -> String {
        self.id.to_hex()
    }

    fn journal(&self) -> &Journal {
        &self.journal
    }

    fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }
}

pub fn server() -> (MemoryDriver, Server<MemoryDriver>) {
    let driver = MemoryDriver::new("test");
    (driver.clone(), Server::new(driver))
}

/// Saves `people` through a fresh session and returns them with their journals stamped.
pub fn saved(server: &Server<MemoryDriver>, people: &[(&str, i32)]) -> Vec<Person> {
    let session = server.new_session(Context::background());
    let coll = session.collection(PEOPLE);
    people
        .iter()
        .map(|(name, age)| {
            let mut p = Person::new(name, *age);
            coll.save(&mut p, "seed").unwrap();
            p
        })
        .collect()
}
