//! Common types used throughout keel.

use serde::{Deserialize, Serialize};

/// On-disk format version stamped on newly created volumes.
pub const CURRENT_VERSION: u8 = 3;

/// Cluster-unique identifier of a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(u32);

impl VolumeId {
    /// Creates a volume id from its raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VolumeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for VolumeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// How the replicas of a volume are spread over failure domains.
///
/// The string form is up to three digits, `"<dc><rack><same>"`:
///
/// ```text
/// 000  one copy, no replication
/// 001  two copies on different servers in the same rack
/// 010  two copies on different racks in the same data center
/// 100  two copies in different data centers
/// 200  three copies, each in a different data center
/// 110  three copies: two data centers, two racks in one of them
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReplicaPlacement {
    diff_data_center_count: u8,
    diff_rack_count: u8,
    same_rack_count: u8,
}

impl ReplicaPlacement {
    /// Creates a placement from its three counts.
    ///
    /// # Errors
    ///
    /// Returns an error if any count does not fit in a single decimal digit.
    pub fn new(
        diff_data_center_count: u8,
        diff_rack_count: u8,
        same_rack_count: u8,
    ) -> Result<Self, ParseReplicaPlacementError> {
        if diff_data_center_count > 9 || diff_rack_count > 9 || same_rack_count > 9 {
            return Err(ParseReplicaPlacementError(format!(
                "{diff_data_center_count},{diff_rack_count},{same_rack_count}"
            )));
        }
        Ok(Self { diff_data_center_count, diff_rack_count, same_rack_count })
    }

    /// Decodes the packed numeric form `dc * 100 + rack * 10 + same`.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is larger than `999`.
    pub fn from_code(code: u16) -> Result<Self, ParseReplicaPlacementError> {
        if code > 999 {
            return Err(ParseReplicaPlacementError(code.to_string()));
        }
        Self::new((code / 100) as u8, ((code % 100) / 10) as u8, (code % 10) as u8)
    }

    /// Encodes the placement into its packed numeric form.
    #[must_use]
    pub fn to_code(self) -> u16 {
        u16::from(self.diff_data_center_count) * 100
            + u16::from(self.diff_rack_count) * 10
            + u16::from(self.same_rack_count)
    }

    /// Number of additional data centers that receive a replica.
    #[must_use]
    pub fn diff_data_center_count(self) -> usize {
        usize::from(self.diff_data_center_count)
    }

    /// Number of additional racks in the main data center that receive a replica.
    #[must_use]
    pub fn diff_rack_count(self) -> usize {
        usize::from(self.diff_rack_count)
    }

    /// Number of additional servers in the main rack that receive a replica.
    #[must_use]
    pub fn same_rack_count(self) -> usize {
        usize::from(self.same_rack_count)
    }

    /// Total number of copies of a volume, including the first.
    #[must_use]
    pub fn copy_count(self) -> usize {
        self.diff_data_center_count() + self.diff_rack_count() + self.same_rack_count() + 1
    }
}

impl std::fmt::Display for ReplicaPlacement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.diff_data_center_count, self.diff_rack_count, self.same_rack_count)
    }
}

impl std::str::FromStr for ReplicaPlacement {
    type Err = ParseReplicaPlacementError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.chars().count() > 3 {
            return Err(ParseReplicaPlacementError(s.to_string()));
        }
        let mut counts = [0u8; 3];
        for (slot, c) in counts.iter_mut().zip(s.chars()) {
            let digit = c.to_digit(10).ok_or_else(|| ParseReplicaPlacementError(s.to_string()))?;
            *slot = digit as u8;
        }
        Self::new(counts[0], counts[1], counts[2])
    }
}

impl TryFrom<String> for ReplicaPlacement {
    type Error = ParseReplicaPlacementError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReplicaPlacement> for String {
    fn from(value: ReplicaPlacement) -> Self {
        value.to_string()
    }
}

/// Error parsing a replica placement string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseReplicaPlacementError(String);

impl std::fmt::Display for ParseReplicaPlacementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid replica placement '{}': expected up to three digits such as '001'",
            self.0
        )
    }
}

impl std::error::Error for ParseReplicaPlacementError {}

/// Unit of a volume TTL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TtlUnit {
    /// No expiry.
    #[default]
    Empty,
    /// Minutes (`m`).
    Minute,
    /// Hours (`h`).
    Hour,
    /// Days (`d`).
    Day,
    /// Weeks (`w`).
    Week,
    /// Months (`M`).
    Month,
    /// Years (`y`).
    Year,
}

impl TtlUnit {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'm' => Some(Self::Minute),
            'h' => Some(Self::Hour),
            'd' => Some(Self::Day),
            'w' => Some(Self::Week),
            'M' => Some(Self::Month),
            'y' => Some(Self::Year),
            _ => None,
        }
    }

    fn as_char(self) -> Option<char> {
        match self {
            Self::Empty => None,
            Self::Minute => Some('m'),
            Self::Hour => Some('h'),
            Self::Day => Some('d'),
            Self::Week => Some('w'),
            Self::Month => Some('M'),
            Self::Year => Some('y'),
        }
    }

    fn minutes(self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Minute => 1,
            Self::Hour => 60,
            Self::Day => 24 * 60,
            Self::Week => 7 * 24 * 60,
            Self::Month => 31 * 24 * 60,
            Self::Year => 365 * 24 * 60,
        }
    }
}

/// Time-to-live of every needle written to a volume.
///
/// Written as a count followed by a unit, e.g. `"3d"`. A bare number is read as
/// minutes and the empty string means the volume never expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ttl {
    count: u8,
    unit: TtlUnit,
}

impl Ttl {
    /// A TTL that never expires.
    pub const EMPTY: Self = Self { count: 0, unit: TtlUnit::Empty };

    /// Creates a TTL. A zero count or an empty unit yields [`Ttl::EMPTY`].
    #[must_use]
    pub const fn new(count: u8, unit: TtlUnit) -> Self {
        if count == 0 || matches!(unit, TtlUnit::Empty) {
            return Self::EMPTY;
        }
        Self { count, unit }
    }

    /// Returns true if this TTL never expires.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.count == 0 || self.unit == TtlUnit::Empty
    }

    /// Length of the TTL in minutes, zero when empty.
    #[must_use]
    pub fn minutes(self) -> u32 {
        u32::from(self.count) * self.unit.minutes()
    }
}

impl std::fmt::Display for Ttl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.unit.as_char() {
            Some(unit) if self.count > 0 => write!(f, "{}{}", self.count, unit),
            _ => Ok(()),
        }
    }
}

impl std::str::FromStr for Ttl {
    type Err = ParseTtlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let Some(last) = s.chars().last() else {
            return Ok(Self::EMPTY);
        };
        let (digits, unit) = if last.is_ascii_digit() {
            (s, TtlUnit::Minute)
        } else {
            let unit = TtlUnit::from_char(last).ok_or_else(|| ParseTtlError(s.to_string()))?;
            (&s[..s.len() - last.len_utf8()], unit)
        };
        let count: u8 = digits.parse().map_err(|_| ParseTtlError(s.to_string()))?;
        Ok(Self::new(count, unit))
    }
}

impl TryFrom<String> for Ttl {
    type Error = ParseTtlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ttl> for String {
    fn from(value: Ttl) -> Self {
        value.to_string()
    }
}

/// Error parsing a TTL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTtlError(String);

impl std::fmt::Display for ParseTtlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid ttl '{}': expected a count up to 255 followed by one of m, h, d, w, M, y",
            self.0
        )
    }
}

impl std::error::Error for ParseTtlError {}

/// Record of one volume replica hosted by a data node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    /// Volume id.
    pub id: VolumeId,
    /// Bytes currently stored.
    pub size: u64,
    /// Collection the volume belongs to.
    pub collection: String,
    /// Replication policy of the volume.
    pub replica_placement: ReplicaPlacement,
    /// Expiry of the volume's content.
    pub ttl: Ttl,
    /// On-disk format version.
    pub version: u8,
    /// Whether the volume refuses writes.
    pub read_only: bool,
}

impl VolumeInfo {
    /// Creates the record for a freshly allocated, empty volume.
    #[must_use]
    pub fn new(
        id: VolumeId,
        collection: impl Into<String>,
        replica_placement: ReplicaPlacement,
        ttl: Ttl,
    ) -> Self {
        Self {
            id,
            size: 0,
            collection: collection.into(),
            replica_placement,
            ttl,
            version: CURRENT_VERSION,
            read_only: false,
        }
    }
}
