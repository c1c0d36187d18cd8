//! Room registry
//!
//! Authoritative store of room code → membership. All membership changes go
//! through [`RoomRegistry::admit`] and [`RoomRegistry::evict`], which inspect
//! and mutate under one lock, so a room never holds more than two members
//! and a connection never sits in two rooms.
//!
//! The outcome of an admit or evict keeps the lock held until it is dropped.
//! The router sends its join/leave notifications while holding it, which
//! keeps the notifications to any one connection in membership order.

use crate::error::RegistryError;
use duet_protocol::{PeerId, RoomCode};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A room never admits more than this many connections
pub const ROOM_CAPACITY: usize = 2;

/// Fresh codes tried before `create_room` gives up
pub const CODE_ATTEMPTS: usize = 8;

const CODE_BYTES: usize = 3;
const ADMIN_TOKEN_BYTES: usize = 12;

/// Produces candidate room codes
pub type CodeGenerator = fn() -> Result<RoomCode, RegistryError>;

/// Room state
#[derive(Debug)]
struct Room {
    /// Admitted connections, in admission order
    members: Vec<PeerId>,
    last_activity: Instant,
}

#[derive(Default, Debug)]
struct Inner {
    rooms: HashMap<RoomCode, Room>,
    /// Reverse index: which room each admitted connection is in
    memberships: HashMap<PeerId, RoomCode>,
}

impl Inner {
    /// Check that `peer` may enter `code`, without changing anything
    fn check_admission(&self, code: &RoomCode, peer: PeerId) -> Result<(), RegistryError> {
        let room = self.rooms.get(code).ok_or(RegistryError::RoomNotFound)?;
        if self.memberships.get(&peer) == Some(code) {
            return Err(RegistryError::AlreadyInRoom);
        }
        if room.members.len() >= ROOM_CAPACITY {
            return Err(RegistryError::RoomFull);
        }
        Ok(())
    }

    /// Append `peer` to a room already checked by `check_admission`
    fn insert_member(&mut self, code: &RoomCode, peer: PeerId) -> Result<Vec<PeerId>, RegistryError> {
        let room = self
            .rooms
            .get_mut(code)
            .ok_or(RegistryError::RoomNotFound)?;
        let peers = room.members.clone();
        room.members.push(peer);
        room.last_activity = Instant::now();
        self.memberships.insert(peer, code.clone());
        debug_assert!(room.members.len() <= ROOM_CAPACITY);
        Ok(peers)
    }

    /// Take `peer` out of its room, deleting the room if that empties it
    fn remove_member(&mut self, peer: PeerId) -> Option<Departure> {
        let code = self.memberships.remove(&peer)?;
        let Some(room) = self.rooms.get_mut(&code) else {
            tracing::error!(%code, %peer, "membership index points at a missing room");
            return None;
        };

        room.members.retain(|member| *member != peer);
        room.last_activity = Instant::now();
        let remaining = room.members.clone();

        let room_deleted = remaining.is_empty();
        if room_deleted {
            self.rooms.remove(&code);
        }

        Some(Departure {
            code,
            remaining,
            room_deleted,
        })
    }
}

/// What a connection left behind when it was removed from a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub code: RoomCode,
    /// Members still in the room after the removal
    pub remaining: Vec<PeerId>,
    /// Whether the removal emptied and deleted the room
    pub room_deleted: bool,
}

/// Result of a successful room creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedRoom {
    pub code: RoomCode,
    pub admin_token: String,
}

/// A successful admission. Holds the registry lock until dropped.
#[must_use]
pub struct Admission<'a> {
    code: RoomCode,
    peers: Vec<PeerId>,
    departed: Option<Departure>,
    _guard: MutexGuard<'a, Inner>,
}

impl Admission<'_> {
    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Members that were already present when the connection was admitted
    pub fn peers(&self) -> &[PeerId] {
        &self.peers
    }

    /// The room the connection moved out of, for [`RoomRegistry::admit_moving`]
    pub fn departed(&self) -> Option<&Departure> {
        self.departed.as_ref()
    }
}

/// A successful eviction. Holds the registry lock until dropped.
#[must_use]
pub struct Eviction<'a> {
    departure: Departure,
    _guard: MutexGuard<'a, Inner>,
}

impl Eviction<'_> {
    pub fn departure(&self) -> &Departure {
        &self.departure
    }

    pub fn code(&self) -> &RoomCode {
        &self.departure.code
    }

    /// Members still in the room after the removal
    pub fn remaining(&self) -> &[PeerId] {
        &self.departure.remaining
    }

    /// Whether the removal emptied and deleted the room
    pub fn room_deleted(&self) -> bool {
        self.departure.room_deleted
    }
}

/// Which rooms a [`RoomRegistry::snapshot`] lists
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoomFilter {
    pub code_prefix: Option<String>,
    pub min_members: usize,
}

impl RoomFilter {
    fn matches(&self, code: &RoomCode, room: &Room) -> bool {
        room.members.len() >= self.min_members
            && self
                .code_prefix
                .as_deref()
                .is_none_or(|prefix| code.as_str().starts_with(prefix))
    }
}

/// The registry of live rooms
pub struct RoomRegistry {
    inner: Mutex<Inner>,
    generate_code: CodeGenerator,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("room_count", &self.len())
            .finish()
    }
}

impl RoomRegistry {
    /// Registry drawing codes from the OS random source
    pub fn new() -> Self {
        Self::with_code_generator(random_room_code)
    }

    pub fn with_code_generator(generate_code: CodeGenerator) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            generate_code,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves `Inner` consistent before it can panic
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty room under a fresh code
    ///
    /// Regenerates on collision with a live room, and fails with
    /// `DuplicateCode` after [`CODE_ATTEMPTS`] collisions in a row.
    pub fn create_room(&self) -> Result<CreatedRoom, RegistryError> {
        let admin_token = random_hex(ADMIN_TOKEN_BYTES)?;
        let mut state = self.lock();

        for _ in 0..CODE_ATTEMPTS {
            let code = (self.generate_code)()?;
            if state.rooms.contains_key(&code) {
                tracing::warn!(%code, "room code collision, regenerating");
                continue;
            }
            state.rooms.insert(
                code.clone(),
                Room {
                    members: Vec::with_capacity(ROOM_CAPACITY),
                    last_activity: Instant::now(),
                },
            );
            return Ok(CreatedRoom { code, admin_token });
        }

        Err(RegistryError::DuplicateCode)
    }

    /// Admit a connection to a room
    ///
    /// Check and append happen under the same lock: of two connections
    /// racing for the last slot exactly one gets in and the other sees
    /// `RoomFull`.
    ///
    /// A connection already bound to a room, this one or another, is refused
    /// with `AlreadyInRoom`; see [`RoomRegistry::admit_moving`] to switch
    /// rooms.
    pub fn admit(&self, code: &RoomCode, peer: PeerId) -> Result<Admission<'_>, RegistryError> {
        let mut state = self.lock();

        state.check_admission(code, peer)?;
        if state.memberships.contains_key(&peer) {
            return Err(RegistryError::AlreadyInRoom);
        }
        let peers = state.insert_member(code, peer)?;

        Ok(Admission {
            code: code.clone(),
            peers,
            departed: None,
            _guard: state,
        })
    }

    /// Admit a connection, moving it out of its current room if it has one
    ///
    /// The target is checked before anything changes. A refused move leaves
    /// the connection where it was; a successful one removes it from the
    /// old room (deleting that room if it empties) and admits it to the new
    /// one in the same critical section.
    pub fn admit_moving(
        &self,
        code: &RoomCode,
        peer: PeerId,
    ) -> Result<Admission<'_>, RegistryError> {
        let mut state = self.lock();

        state.check_admission(code, peer)?;
        let departed = state.remove_member(peer);
        let peers = state.insert_member(code, peer)?;

        Ok(Admission {
            code: code.clone(),
            peers,
            departed,
            _guard: state,
        })
    }

    /// Remove a connection from whatever room it is in
    ///
    /// Deletes the room in the same step when it becomes empty. Returns
    /// `None` when the connection is not a member of any room, which makes
    /// repeated evictions harmless.
    pub fn evict(&self, peer: PeerId) -> Option<Eviction<'_>> {
        let mut state = self.lock();
        let departure = state.remove_member(peer)?;

        Some(Eviction {
            departure,
            _guard: state,
        })
    }

    /// Read-only listing of room codes and their member counts
    pub fn snapshot(&self, filter: &RoomFilter) -> BTreeMap<RoomCode, usize> {
        self.lock()
            .rooms
            .iter()
            .filter(|(code, room)| filter.matches(code, room))
            .map(|(code, room)| (code.clone(), room.members.len()))
            .collect()
    }

    /// Delete rooms that have had no members for longer than `ttl`
    ///
    /// Only empty rooms are reclaimed; occupied rooms go away through leave
    /// or disconnect. Returns the reclaimed codes.
    pub fn reap_idle(&self, ttl: Duration, now: Instant) -> Vec<RoomCode> {
        let mut state = self.lock();
        let expired: Vec<RoomCode> = state
            .rooms
            .iter()
            .filter(|(_, room)| {
                room.members.is_empty() && now.saturating_duration_since(room.last_activity) > ttl
            })
            .map(|(code, _)| code.clone())
            .collect();

        for code in &expired {
            state.rooms.remove(code);
        }
        expired
    }

    pub fn contains(&self, code: &RoomCode) -> bool {
        self.lock().rooms.contains_key(code)
    }

    /// The room a connection currently occupies
    pub fn room_of(&self, peer: PeerId) -> Option<RoomCode> {
        self.lock().memberships.get(&peer).cloned()
    }

    /// Members of a room, in admission order
    pub fn members(&self, code: &RoomCode) -> Option<Vec<PeerId>> {
        self.lock()
            .rooms
            .get(code)
            .map(|room| room.members.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Six lowercase hex characters from three random bytes
pub fn random_room_code() -> Result<RoomCode, RegistryError> {
    random_hex(CODE_BYTES).map(RoomCode)
}

fn random_hex(len: usize) -> Result<String, RegistryError> {
    let mut buf = vec![0u8; len];
    getrandom::fill(&mut buf).map_err(|e| RegistryError::Random(e.to_string()))?;
    Ok(hex::encode(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::{Arc, Barrier};

    fn fixed_code() -> Result<RoomCode, RegistryError> {
        Ok(RoomCode::from("a1b2c3"))
    }

    #[test]
    fn random_codes_are_six_hex_chars() {
        let code = random_room_code().unwrap();
        assert_eq!(code.as_str().len(), 6);
        assert!(code.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn create_room_starts_empty() {
        let registry = RoomRegistry::new();
        let created = registry.create_room().unwrap();

        assert_eq!(created.admin_token.len(), ADMIN_TOKEN_BYTES * 2);
        assert!(registry.contains(&created.code));
        assert_eq!(registry.members(&created.code), Some(vec![]));
    }

    #[test]
    fn create_room_fails_loudly_after_repeated_collisions() {
        let registry = RoomRegistry::with_code_generator(fixed_code);
        registry.create_room().unwrap();

        assert_eq!(registry.create_room(), Err(RegistryError::DuplicateCode));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn admit_unknown_room() {
        let registry = RoomRegistry::new();
        let result = registry.admit(&RoomCode::from("ffffff"), PeerId::new_v4());
        assert!(matches!(result, Err(RegistryError::RoomNotFound)));
    }

    #[test]
    fn admit_reports_present_peers() {
        let registry = RoomRegistry::with_code_generator(fixed_code);
        let code = registry.create_room().unwrap().code;
        let (x, y) = (PeerId::new_v4(), PeerId::new_v4());

        {
            let first = registry.admit(&code, x).unwrap();
            assert!(first.peers().is_empty());
        }
        {
            let second = registry.admit(&code, y).unwrap();
            assert_eq!(second.peers(), &[x]);
        }
        assert_eq!(registry.members(&code), Some(vec![x, y]));
    }

    #[test]
    fn third_admit_is_refused() {
        let registry = RoomRegistry::new();
        let code = registry.create_room().unwrap().code;
        drop(registry.admit(&code, PeerId::new_v4()).unwrap());
        drop(registry.admit(&code, PeerId::new_v4()).unwrap());

        let z = PeerId::new_v4();
        assert!(matches!(registry.admit(&code, z), Err(RegistryError::RoomFull)));
        assert_eq!(registry.members(&code).unwrap().len(), 2);
        assert_eq!(registry.room_of(z), None);
    }

    #[test]
    fn readmitting_a_member_is_refused() {
        let registry = RoomRegistry::new();
        let code = registry.create_room().unwrap().code;
        let x = PeerId::new_v4();
        drop(registry.admit(&code, x).unwrap());

        assert!(matches!(
            registry.admit(&code, x),
            Err(RegistryError::AlreadyInRoom)
        ));
        assert_eq!(registry.members(&code), Some(vec![x]));
    }

    #[test]
    fn admit_refuses_connection_bound_elsewhere() {
        let registry = RoomRegistry::new();
        let first = registry.create_room().unwrap().code;
        let second = registry.create_room().unwrap().code;
        let x = PeerId::new_v4();
        drop(registry.admit(&first, x).unwrap());

        assert!(matches!(
            registry.admit(&second, x),
            Err(RegistryError::AlreadyInRoom)
        ));
        assert_eq!(registry.room_of(x), Some(first));
        assert_eq!(registry.members(&second), Some(vec![]));
    }

    #[test]
    fn admit_moving_switches_rooms_atomically() {
        let registry = RoomRegistry::new();
        let first = registry.create_room().unwrap().code;
        let second = registry.create_room().unwrap().code;
        let (x, y) = (PeerId::new_v4(), PeerId::new_v4());
        drop(registry.admit(&first, x).unwrap());
        drop(registry.admit(&first, y).unwrap());

        let admission = registry.admit_moving(&second, x).unwrap();
        assert!(admission.peers().is_empty());
        assert_eq!(
            admission.departed(),
            Some(&Departure {
                code: first.clone(),
                remaining: vec![y],
                room_deleted: false,
            })
        );
        drop(admission);

        assert_eq!(registry.room_of(x), Some(second.clone()));
        assert_eq!(registry.members(&first), Some(vec![y]));
        assert_eq!(registry.members(&second), Some(vec![x]));
    }

    #[test]
    fn admit_moving_deletes_room_it_empties() {
        let registry = RoomRegistry::new();
        let first = registry.create_room().unwrap().code;
        let second = registry.create_room().unwrap().code;
        let x = PeerId::new_v4();
        drop(registry.admit(&first, x).unwrap());

        let admission = registry.admit_moving(&second, x).unwrap();
        assert!(admission.departed().is_some_and(|d| d.room_deleted));
        drop(admission);
        assert!(!registry.contains(&first));
    }

    #[test]
    fn refused_move_keeps_current_room() {
        let registry = RoomRegistry::new();
        let home = registry.create_room().unwrap().code;
        let full = registry.create_room().unwrap().code;
        let x = PeerId::new_v4();
        drop(registry.admit(&home, x).unwrap());
        drop(registry.admit(&full, PeerId::new_v4()).unwrap());
        drop(registry.admit(&full, PeerId::new_v4()).unwrap());

        assert!(matches!(
            registry.admit_moving(&RoomCode::from("zzzzzz"), x),
            Err(RegistryError::RoomNotFound)
        ));
        assert!(matches!(
            registry.admit_moving(&full, x),
            Err(RegistryError::RoomFull)
        ));
        assert!(matches!(
            registry.admit_moving(&home, x),
            Err(RegistryError::AlreadyInRoom)
        ));

        assert_eq!(registry.room_of(x), Some(home.clone()));
        assert_eq!(registry.members(&home), Some(vec![x]));
        assert_eq!(registry.members(&full).unwrap().len(), 2);
    }

    #[test]
    fn evict_returns_remaining_member() {
        let registry = RoomRegistry::new();
        let code = registry.create_room().unwrap().code;
        let (x, y) = (PeerId::new_v4(), PeerId::new_v4());
        drop(registry.admit(&code, x).unwrap());
        drop(registry.admit(&code, y).unwrap());

        let eviction = registry.evict(x).unwrap();
        assert_eq!(eviction.code(), &code);
        assert_eq!(eviction.remaining(), &[y]);
        assert!(!eviction.room_deleted());
    }

    #[test]
    fn evicting_last_member_deletes_room() {
        let registry = RoomRegistry::new();
        let code = registry.create_room().unwrap().code;
        let x = PeerId::new_v4();
        drop(registry.admit(&code, x).unwrap());

        let eviction = registry.evict(x).unwrap();
        assert!(eviction.remaining().is_empty());
        assert!(eviction.room_deleted());
        drop(eviction);

        assert!(!registry.contains(&code));
        assert!(matches!(
            registry.admit(&code, PeerId::new_v4()),
            Err(RegistryError::RoomNotFound)
        ));
    }

    #[test]
    fn evict_non_member_is_a_no_op() {
        let registry = RoomRegistry::new();
        let code = registry.create_room().unwrap().code;
        let x = PeerId::new_v4();

        assert!(registry.evict(x).is_none());
        drop(registry.admit(&code, x).unwrap());
        drop(registry.evict(x).unwrap());
        assert!(registry.evict(x).is_none());
    }

    #[test]
    fn snapshot_applies_filter() {
        let registry = RoomRegistry::new();
        let occupied = registry.create_room().unwrap().code;
        let empty = registry.create_room().unwrap().code;
        drop(registry.admit(&occupied, PeerId::new_v4()).unwrap());

        let all = registry.snapshot(&RoomFilter::default());
        assert_eq!(all.get(&occupied), Some(&1));
        assert_eq!(all.get(&empty), Some(&0));

        let busy = registry.snapshot(&RoomFilter {
            min_members: 1,
            ..Default::default()
        });
        assert_eq!(busy.len(), 1);
        assert!(busy.contains_key(&occupied));

        let prefixed = registry.snapshot(&RoomFilter {
            code_prefix: Some(empty.as_str().to_string()),
            min_members: 0,
        });
        assert!(prefixed.contains_key(&empty));
    }

    #[test]
    fn reap_idle_only_takes_empty_rooms() {
        let registry = RoomRegistry::new();
        let occupied = registry.create_room().unwrap().code;
        let empty = registry.create_room().unwrap().code;
        drop(registry.admit(&occupied, PeerId::new_v4()).unwrap());

        let ttl = Duration::from_secs(60);
        assert!(registry.reap_idle(ttl, Instant::now()).is_empty());

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.reap_idle(ttl, later), vec![empty.clone()]);
        assert!(registry.contains(&occupied));
        assert!(!registry.contains(&empty));
    }

    #[test]
    fn racing_admits_for_last_slot() {
        for _ in 0..50 {
            let registry = Arc::new(RoomRegistry::new());
            let code = registry.create_room().unwrap().code;
            drop(registry.admit(&code, PeerId::new_v4()).unwrap());

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    let barrier = Arc::clone(&barrier);
                    let code = code.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        registry.admit(&code, PeerId::new_v4()).map(drop)
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert_eq!(
                results
                    .iter()
                    .filter(|r| matches!(r, Err(RegistryError::RoomFull)))
                    .count(),
                1
            );
            assert_eq!(registry.members(&code).unwrap().len(), 2);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Admit(usize),
        Move(usize),
        Evict(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..6).prop_map(Op::Admit),
            (0usize..6).prop_map(Op::Move),
            (0usize..6).prop_map(Op::Evict),
        ]
    }

    proptest! {
        #[test]
        fn prop_concurrent_admits_never_exceed_capacity(contenders in 2usize..12) {
            let registry = Arc::new(RoomRegistry::new());
            let code = registry.create_room().unwrap().code;
            let barrier = Arc::new(Barrier::new(contenders));

            let handles: Vec<_> = (0..contenders)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    let barrier = Arc::clone(&barrier);
                    let code = code.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        registry.admit(&code, PeerId::new_v4()).is_ok()
                    })
                })
                .collect();

            let admitted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();

            prop_assert_eq!(admitted, ROOM_CAPACITY);
            prop_assert_eq!(registry.members(&code).unwrap().len(), ROOM_CAPACITY);
        }

        #[test]
        fn prop_membership_stays_consistent(ops in proptest::collection::vec(op(), 1..60)) {
            let registry = RoomRegistry::new();
            let rooms: Vec<RoomCode> =
                (0..2).map(|_| registry.create_room().unwrap().code).collect();
            let peers: Vec<PeerId> = (0..6).map(|_| PeerId::new_v4()).collect();

            for (step, op) in ops.into_iter().enumerate() {
                match op {
                    Op::Admit(i) => {
                        let code = &rooms[step % rooms.len()];
                        let _ = registry.admit(code, peers[i]).map(drop);
                    }
                    Op::Move(i) => {
                        let code = &rooms[step % rooms.len()];
                        let before = registry.room_of(peers[i]);
                        if registry.admit_moving(code, peers[i]).map(drop).is_err() {
                            prop_assert_eq!(registry.room_of(peers[i]), before);
                        }
                    }
                    Op::Evict(i) => drop(registry.evict(peers[i])),
                }

                let snapshot = registry.snapshot(&RoomFilter::default());
                for count in snapshot.values() {
                    prop_assert!(*count <= ROOM_CAPACITY);
                }
                for peer in &peers {
                    let holding = snapshot
                        .keys()
                        .filter(|code| {
                            registry.members(code).is_some_and(|m| m.contains(peer))
                        })
                        .count();
                    prop_assert!(holding <= 1);
                    prop_assert_eq!(holding == 1, registry.room_of(*peer).is_some());
                }
            }
        }
    }
}
