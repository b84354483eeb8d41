//! Partition keys, tokens, and the ring order.
//!
//! A partition key is hashed onto an opaque, totally ordered [`Token`];
//! the `(token, key)` pair forms a [`DecoratedKey`]. [`RingPosition`]
//! extends decorated keys with before/after sentinels per token so that
//! half-open [`PartitionRange`]s can be expressed.

use std::{cmp::Ordering, fmt};

use xxhash_rust::xxh3::xxh3_64;

/// Opaque, totally ordered point on the partition ring.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(u64);

impl Token {
    /// Least token value.
    pub const MIN: Self = Token(0);
    /// Greatest token value.
    pub const MAX: Self = Token(u64::MAX);

    /// Construct a token from a raw `u64`.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value backing this token.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Token").field(&self.0).finish()
    }
}

/// Raw partition key bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey(Vec<u8>);

impl PartitionKey {
    /// Build a key from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Key bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "PartitionKey({s:?})"),
            Err(_) => write!(f, "PartitionKey({:02x?})", self.0),
        }
    }
}

/// Maps partition keys onto the ring.
///
/// The token is a stable 64-bit hash of the key bytes; equal keys always
/// land on the same token regardless of process or platform.
#[derive(Clone, Copy, Debug, Default)]
pub struct Partitioner;

impl Partitioner {
    /// Token for `key`.
    pub fn token_of(&self, key: &PartitionKey) -> Token {
        Token(xxh3_64(key.bytes()))
    }

    /// Pair `key` with its token.
    pub fn decorate(&self, key: PartitionKey) -> DecoratedKey {
        let token = self.token_of(&key);
        DecoratedKey { token, key }
    }
}

/// Partition key paired with its token; ordered lexicographically on
/// `(token, key)`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DecoratedKey {
    token: Token,
    key: PartitionKey,
}

impl DecoratedKey {
    /// Token of this key.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Underlying partition key.
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub(crate) fn memory_usage(&self) -> usize {
        8 + self.key.memory_usage()
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for DecoratedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratedKey")
            .field("token", &self.token.0)
            .field("key", &self.key)
            .finish()
    }
}

/// Point on the ring: a decorated key, or a before/after sentinel for a
/// token.
#[derive(Clone, PartialEq, Eq)]
pub struct RingPosition {
    token: Token,
    key: Option<PartitionKey>,
    weight: i8,
}

impl RingPosition {
    /// Position immediately before every key of `token`.
    pub fn starting_at(token: Token) -> Self {
        Self {
            token,
            key: None,
            weight: -1,
        }
    }

    /// Position immediately after every key of `token`.
    pub fn after(token: Token) -> Self {
        Self {
            token,
            key: None,
            weight: 1,
        }
    }

    /// Position of a concrete key.
    pub fn for_key(key: DecoratedKey) -> Self {
        Self {
            token: key.token,
            key: Some(key.key),
            weight: 0,
        }
    }

    /// Least ring position.
    pub fn min() -> Self {
        Self::starting_at(Token::MIN)
    }

    /// Greatest ring position.
    pub fn max() -> Self {
        Self::after(Token::MAX)
    }

    /// Whether this is the greatest ring position.
    pub fn is_max(&self) -> bool {
        self.key.is_none() && self.token == Token::MAX && self.weight > 0
    }

    /// Token of this position.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Order relative to a concrete key.
    pub fn cmp_key(&self, key: &DecoratedKey) -> Ordering {
        self.token.cmp(&key.token).then_with(|| match &self.key {
            Some(k) => k.cmp(&key.key),
            None => self.weight.cmp(&0),
        })
    }
}

impl From<DecoratedKey> for RingPosition {
    fn from(key: DecoratedKey) -> Self {
        Self::for_key(key)
    }
}

impl Ord for RingPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| match (&self.key, &other.key) {
                (Some(a), Some(b)) => a.cmp(b),
                (Some(_), None) => 0.cmp(&other.weight),
                (None, Some(_)) => self.weight.cmp(&0),
                (None, None) => self.weight.cmp(&other.weight),
            })
    }
}

impl PartialOrd for RingPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for RingPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.key, self.weight) {
            (Some(key), _) => write!(f, "RingPosition({:?}, {key:?})", self.token.0),
            (None, w) if w < 0 => write!(f, "RingPosition(before {:?})", self.token.0),
            (None, _) => write!(f, "RingPosition(after {:?})", self.token.0),
        }
    }
}

/// One end of a partition range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionBound {
    /// Ring position of the bound.
    pub position: RingPosition,
    /// Whether a key exactly at the bound belongs to the range.
    pub inclusive: bool,
}

impl PartitionBound {
    /// Inclusive bound at `position`.
    pub fn inclusive(position: impl Into<RingPosition>) -> Self {
        Self {
            position: position.into(),
            inclusive: true,
        }
    }

    /// Exclusive bound at `position`.
    pub fn exclusive(position: impl Into<RingPosition>) -> Self {
        Self {
            position: position.into(),
            inclusive: false,
        }
    }
}

/// Range of partitions over ring positions; either end may be open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionRange {
    start: Option<PartitionBound>,
    end: Option<PartitionBound>,
}

impl PartitionRange {
    /// Range covering the whole ring.
    pub fn open_both() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Inclusive range `[start, end]`.
    pub fn make(start: impl Into<RingPosition>, end: impl Into<RingPosition>) -> Self {
        Self {
            start: Some(PartitionBound::inclusive(start)),
            end: Some(PartitionBound::inclusive(end)),
        }
    }

    /// Range with explicit bounds.
    pub fn make_bounds(start: Option<PartitionBound>, end: Option<PartitionBound>) -> Self {
        Self { start, end }
    }

    /// Range covering exactly one key.
    pub fn singular(key: DecoratedKey) -> Self {
        let position = RingPosition::for_key(key);
        Self {
            start: Some(PartitionBound::inclusive(position.clone())),
            end: Some(PartitionBound::inclusive(position)),
        }
    }

    /// Range `[start, +inf)`.
    pub fn starting_with(start: impl Into<RingPosition>) -> Self {
        Self {
            start: Some(PartitionBound::inclusive(start)),
            end: None,
        }
    }

    /// Range `(-inf, end]` (or `(-inf, end)` with an exclusive bound).
    pub fn ending_with(end: PartitionBound) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Start bound, if any.
    pub fn start(&self) -> Option<&PartitionBound> {
        self.start.as_ref()
    }

    /// End bound, if any.
    pub fn end(&self) -> Option<&PartitionBound> {
        self.end.as_ref()
    }

    /// Ring position at which the range begins.
    pub fn start_position(&self) -> RingPosition {
        match &self.start {
            Some(bound) => bound.position.clone(),
            None => RingPosition::min(),
        }
    }

    /// Whether `key` lies before the start of the range.
    pub fn before(&self, key: &DecoratedKey) -> bool {
        match &self.start {
            None => false,
            Some(bound) => match bound.position.cmp_key(key) {
                Ordering::Greater => true,
                Ordering::Equal => !bound.inclusive,
                Ordering::Less => false,
            },
        }
    }

    /// Whether `key` lies after the end of the range.
    pub fn after(&self, key: &DecoratedKey) -> bool {
        match &self.end {
            None => false,
            Some(bound) => match bound.position.cmp_key(key) {
                Ordering::Less => true,
                Ordering::Equal => !bound.inclusive,
                Ordering::Greater => false,
            },
        }
    }

    /// Whether `key` belongs to the range.
    pub fn contains(&self, key: &DecoratedKey) -> bool {
        !self.before(key) && !self.after(key)
    }
}
