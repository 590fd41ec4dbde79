// used for snapshots of a world
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::construct::{Entity, Id};
use crate::error::{QuarryError, Result};
use crate::store::FactStore;
use crate::world::World;

const TAG: i64 = 0;
const PAIR: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

/// Saves and restores entity records and facts of a [`World`] in SQLite.
pub struct Persistor {
    connection: Connection,
}

impl Persistor {
    pub fn new(mode: PersistenceMode) -> Result<Persistor> {
        let connection = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        debug!(?mode, "opening snapshot store");
        connection.execute_batch(
            "
            create table if not exists Entity (
                Entity_Index integer not null,
                Entity_Generation integer not null,
                Alive integer not null,
                Name text null,
                constraint referenceable_Entity_Index primary key (
                    Entity_Index
                )
            );
            create table if not exists Fact (
                Entity_Bits integer not null,
                Kind integer not null,
                First_Bits integer not null,
                Second_Bits integer null,
                constraint unique_Fact unique (
                    Entity_Bits,
                    Kind,
                    First_Bits,
                    Second_Bits
                )
            );
            create table if not exists Snapshot (
                Snapshot_Identity integer primary key autoincrement,
                SavedAt text not null,
                Entities integer not null,
                Facts integer not null
            );
            ",
        )?;
        Ok(Persistor { connection })
    }

    /// Replaces the stored snapshot with the current contents of `world`.
    /// Returns the number of facts written.
    pub fn save(&mut self, world: &World) -> Result<usize> {
        let transaction = self.connection.transaction()?;
        transaction.execute("delete from Fact", [])?;
        transaction.execute("delete from Entity", [])?;
        let mut entities = 0;
        let mut facts = 0;
        {
            let mut add_entity = transaction.prepare(
                "
                insert into Entity (
                    Entity_Index,
                    Entity_Generation,
                    Alive,
                    Name
                ) values (?, ?, ?, ?)
                ",
            )?;
            let mut add_fact = transaction.prepare(
                "
                insert or ignore into Fact (
                    Entity_Bits,
                    Kind,
                    First_Bits,
                    Second_Bits
                ) values (?, ?, ?, ?)
                ",
            )?;
            for (entity, alive) in world.generator().records() {
                add_entity.execute(params![entity.index(), entity.generation(), alive, world.name_of(entity)])?;
                entities += 1;
                if !alive {
                    continue;
                }
                for id in world.ids_of(entity) {
                    let (kind, first, second) = match *id {
                        Id::Entity(e) => (TAG, e.to_bits() as i64, None),
                        Id::Pair(p, o) => (PAIR, p.to_bits() as i64, Some(o.to_bits() as i64)),
                    };
                    add_fact.execute(params![entity.to_bits() as i64, kind, first, second])?;
                    facts += 1;
                }
            }
        }
        transaction.execute(
            "insert into Snapshot (SavedAt, Entities, Facts) values (?, ?, ?)",
            params![Utc::now(), entities, facts],
        )?;
        transaction.commit()?;
        info!(entities, facts, "snapshot saved");
        Ok(facts)
    }

    /// Loads the stored snapshot into a freshly created world. Returns the
    /// number of facts restored.
    pub fn restore(&self, world: &mut World) -> Result<usize> {
        let mut all_entities = self.connection.prepare(
            "select Entity_Index, Entity_Generation, Alive, Name from Entity order by Entity_Index",
        )?;
        let records = all_entities.query_map([], |row| {
            Ok((
                Entity::new(row.get(0)?, row.get(1)?),
                row.get::<_, bool>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        for record in records {
            let (entity, alive, name) = record?;
            world.restore_entity(entity, alive, name.as_deref());
        }

        let mut all_facts = self
            .connection
            .prepare("select Entity_Bits, Kind, First_Bits, Second_Bits from Fact order by rowid")?;
        let facts = all_facts.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;
        let mut restored = 0;
        for fact in facts {
            let (entity, kind, first, second) = fact?;
            let entity = Entity::from_bits(entity as u64);
            let first = Entity::from_bits(first as u64);
            let id = match (kind, second) {
                (TAG, None) => Id::Entity(first),
                (PAIR, Some(second)) => Id::pair(first, Entity::from_bits(second as u64)),
                _ => {
                    return Err(QuarryError::Persistence(format!(
                        "malformed fact on {} (kind {})",
                        entity, kind
                    )));
                }
            };
            world.restore_fact(entity, id)?;
            restored += 1;
        }
        info!(facts = restored, entities = world.entity_count(), "snapshot restored");
        Ok(restored)
    }

    /// When the stored snapshot was taken, if there is one.
    pub fn saved_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .connection
            .query_row(
                "select SavedAt from Snapshot order by Snapshot_Identity desc limit 1",
                [],
                |row| row.get(0),
            )
            .optional()?)
    }
}
