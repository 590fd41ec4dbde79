// used for the visited markers and the set of live indexes
use roaring::RoaringBitmap;

// other keepers use HashSet or HashMap with a fast hasher
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;

// used to print out readable forms of a construct
use std::fmt;

pub type EntityHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// ------------- Entity -------------
/// An opaque record identifier: a recyclable index plus a generation that is
/// bumped whenever the index is released. Two entities with the same index
/// but different generations never compare equal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    pub const NULL: Entity = Entity::new(0, 0);

    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
    pub fn index(&self) -> u32 {
        self.index
    }
    pub fn generation(&self) -> u32 {
        self.generation
    }
    pub fn is_null(&self) -> bool {
        self.index == 0
    }
    /// Packs the entity as `generation << 32 | index`.
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
    pub fn from_bits(bits: u64) -> Self {
        Self::new(bits as u32, (bits >> 32) as u32)
    }
}
impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#{}v{}", self.index, self.generation)
        }
    }
}

// ------------- Builtins -------------
pub const WILDCARD: Entity = Entity::new(1, 0);
pub const IS_A: Entity = Entity::new(2, 0);
pub const CHILD_OF: Entity = Entity::new(3, 0);
pub const TRANSITIVE: Entity = Entity::new(4, 0);
pub const REFLEXIVE: Entity = Entity::new(5, 0);
pub const FINAL: Entity = Entity::new(6, 0);
pub const ACYCLIC: Entity = Entity::new(7, 0);
pub const SYMMETRIC: Entity = Entity::new(8, 0);
pub const EXCLUSIVE: Entity = Entity::new(9, 0);
pub const RELATIONSHIP: Entity = Entity::new(10, 0);

/// Builtin entities and the names they are registered under, in index order.
pub const BUILTINS: [(Entity, &str); 10] = [
    (WILDCARD, "*"),
    (IS_A, "IsA"),
    (CHILD_OF, "ChildOf"),
    (TRANSITIVE, "Transitive"),
    (REFLEXIVE, "Reflexive"),
    (FINAL, "Final"),
    (ACYCLIC, "Acyclic"),
    (SYMMETRIC, "Symmetric"),
    (EXCLUSIVE, "Exclusive"),
    (RELATIONSHIP, "Relationship"),
];

pub fn is_trait_marker(entity: Entity) -> bool {
    (TRANSITIVE.index..=RELATIONSHIP.index).contains(&entity.index) && entity.generation == 0
}

// ------------- Id -------------
/// Something an entity can carry: either a plain entity (a tag) or a
/// relationship pair `(predicate, object)`. Either half of a pair may be
/// [`WILDCARD`] when the id is used as a pattern.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Id {
    Entity(Entity),
    Pair(Entity, Entity),
}

impl Id {
    pub fn pair(predicate: Entity, object: Entity) -> Self {
        Id::Pair(predicate, object)
    }
    pub fn is_pair(&self) -> bool {
        matches!(self, Id::Pair(..))
    }
    /// The tag itself, or the predicate of a pair.
    pub fn first(&self) -> Entity {
        match *self {
            Id::Entity(e) => e,
            Id::Pair(p, _) => p,
        }
    }
    pub fn second(&self) -> Option<Entity> {
        match *self {
            Id::Entity(_) => None,
            Id::Pair(_, o) => Some(o),
        }
    }
    pub fn is_wildcard(&self) -> bool {
        match *self {
            Id::Entity(e) => e == WILDCARD,
            Id::Pair(p, o) => p == WILDCARD || o == WILDCARD,
        }
    }
    pub fn references(&self, entity: Entity) -> bool {
        match *self {
            Id::Entity(e) => e == entity,
            Id::Pair(p, o) => p == entity || o == entity,
        }
    }
    /// Does this concrete id match `pattern`, honoring wildcards in the pattern?
    pub fn matches(&self, pattern: Id) -> bool {
        match (*self, pattern) {
            (Id::Entity(e), Id::Entity(p)) => p == WILDCARD || e == p,
            (Id::Pair(p, o), Id::Pair(pp, po)) => {
                (pp == WILDCARD || pp == p) && (po == WILDCARD || po == o)
            }
            _ => false,
        }
    }
    /// The wildcard patterns under which a concrete pair is also indexed.
    pub fn wildcard_keys(&self) -> Vec<Id> {
        match *self {
            Id::Entity(_) => Vec::new(),
            Id::Pair(p, o) => vec![
                Id::Pair(p, WILDCARD),
                Id::Pair(WILDCARD, o),
                Id::Pair(WILDCARD, WILDCARD),
            ],
        }
    }
}
impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Id::Entity(e) => write!(f, "{}", e),
            Id::Pair(p, o) => write!(f, "({}, {})", p, o),
        }
    }
}

// ------------- Relationship traits -------------
/// Per-relationship flags, recorded when a trait marker is added to the
/// relationship entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct RelationTraits {
    pub transitive: bool,
    pub reflexive: bool,
    pub is_final: bool,
    pub acyclic: bool,
    pub symmetric: bool,
    pub exclusive: bool,
    pub relationship: bool,
}

impl RelationTraits {
    /// Sets or clears the flag represented by `marker`. Returns false when
    /// `marker` is not a trait marker.
    pub fn set(&mut self, marker: Entity, on: bool) -> bool {
        let flag = match marker {
            TRANSITIVE => &mut self.transitive,
            REFLEXIVE => &mut self.reflexive,
            FINAL => &mut self.is_final,
            ACYCLIC => &mut self.acyclic,
            SYMMETRIC => &mut self.symmetric,
            EXCLUSIVE => &mut self.exclusive,
            RELATIONSHIP => &mut self.relationship,
            _ => return false,
        };
        *flag = on;
        true
    }
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
    /// Any flag that only makes sense on something used as a pair predicate.
    pub fn marks_relationship(&self) -> bool {
        self.transitive
            || self.reflexive
            || self.acyclic
            || self.symmetric
            || self.exclusive
            || self.relationship
    }
}

// ------------- Entity generator -------------
/// Hands out entity indexes, recycling released ones with a bumped generation.
#[derive(Debug)]
pub struct EntityGenerator {
    lower_bound: u32,
    generations: Vec<u32>,
    retained: RoaringBitmap,
    released: Vec<u32>,
}

impl EntityGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: 0,
            generations: vec![0],
            retained: RoaringBitmap::new(),
            released: Vec::new(),
        }
    }
    // Entities are normally only generated, but restoring a snapshot needs
    // to recreate an exact index and generation.
    pub fn retain(&mut self, entity: Entity) {
        let index = entity.index();
        if index as usize >= self.generations.len() {
            self.generations.resize(index as usize + 1, 0);
        }
        self.generations[index as usize] = entity.generation();
        self.retained.insert(index);
        self.released.retain(|r| *r != index);
        if index > self.lower_bound {
            for gap in self.lower_bound + 1..index {
                if !self.retained.contains(gap) {
                    self.released.push(gap);
                }
            }
            self.lower_bound = index;
        }
    }
    /// Records an index that is currently dead; its next occupant will get
    /// the generation carried by `entity`.
    pub fn retire(&mut self, entity: Entity) {
        self.retain(entity);
        self.retained.remove(entity.index());
        self.released.push(entity.index());
    }
    pub fn check(&self, entity: Entity) -> bool {
        self.retained.contains(entity.index()) && self.current(entity.index()) == Some(entity)
    }
    /// The live entity currently occupying `index`, if any.
    pub fn current(&self, index: u32) -> Option<Entity> {
        if !self.retained.contains(index) {
            return None;
        }
        self.generations
            .get(index as usize)
            .map(|generation| Entity::new(index, *generation))
    }
    pub fn release(&mut self, entity: Entity) -> bool {
        if !self.check(entity) {
            return false;
        }
        let index = entity.index();
        self.retained.remove(index);
        self.generations[index as usize] = self.generations[index as usize].wrapping_add(1);
        self.released.push(index);
        true
    }
    pub fn generate(&mut self) -> Entity {
        let index = self.released.pop().unwrap_or_else(|| {
            self.lower_bound += 1;
            self.generations.push(0);
            self.lower_bound
        });
        self.retained.insert(index);
        Entity::new(index, self.generations[index as usize])
    }
    pub fn len(&self) -> usize {
        self.retained.len() as usize
    }
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }
    /// Every index ever handed out, with its current generation and liveness.
    pub fn records(&self) -> impl Iterator<Item = (Entity, bool)> + '_ {
        (1..=self.lower_bound).map(|index| {
            (
                Entity::new(index, self.generations[index as usize]),
                self.retained.contains(index),
            )
        })
    }
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.retained
            .iter()
            .map(|index| Entity::new(index, self.generations[index as usize]))
    }
}

impl Default for EntityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycled_index_gets_new_generation() {
        let mut generator = EntityGenerator::new();
        let first = generator.generate();
        assert!(generator.release(first));
        let second = generator.generate();
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second, "generation must differ after recycling");
        assert!(!generator.check(first));
        assert!(generator.check(second));
    }

    #[test]
    fn pair_matches_wildcard_patterns() {
        let likes = Entity::new(20, 0);
        let bob = Entity::new(21, 0);
        let id = Id::pair(likes, bob);
        assert!(id.matches(Id::pair(likes, WILDCARD)));
        assert!(id.matches(Id::pair(WILDCARD, bob)));
        assert!(!id.matches(Id::Entity(likes)));
        assert!(!id.matches(Id::pair(bob, likes)));
    }
}
