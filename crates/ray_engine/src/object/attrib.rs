//! Attribute layouts and attribute storage
//!
//! An [`AttribList`] describes the named, typed attributes a family of objects
//! exposes. Lists are interned: two lists with equal content are the same
//! `Arc`, so batching objects by layout is a pointer comparison.
//!
//! The intern table is process-wide. Entries live until
//! [`AttribList::purge_unused`] drops the ones no object references anymore.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::foundation::collections::FastSet;

/// Name of the display colour attribute
pub const DISPLAY_COLOR: &str = "Cd";

/// Element class an attribute is stored on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttribOwner {
    /// One value per point
    Point,
    /// One value per face corner
    Vertex,
    /// One value per primitive (face or curve)
    Primitive,
    /// A single value for the whole object
    Detail,
}

/// Scalar storage of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageType {
    /// 32-bit integers
    Int32,
    /// 64-bit integers
    Int64,
    /// 32-bit floats
    Fp32,
    /// 64-bit floats
    Fp64,
    /// Strings
    String,
}

impl StorageType {
    /// True for the floating point storages that can be interpolated
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Fp32 | Self::Fp64)
    }
}

/// Description of a single attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attrib {
    /// Attribute name
    pub name: String,
    /// Scalars per element (3 for a colour)
    pub tuple_size: u32,
    /// Element class the values are stored on
    pub owner: AttribOwner,
    /// Scalar type
    pub storage: StorageType,
    /// Variable-length array per element
    pub is_array: bool,
}

impl Attrib {
    /// Describe a fixed-size attribute
    pub fn new(name: impl Into<String>, tuple_size: u32, owner: AttribOwner, storage: StorageType) -> Self {
        Self {
            name: name.into(),
            tuple_size,
            owner,
            storage,
            is_array: false,
        }
    }

    /// Describe an array attribute
    pub fn array(name: impl Into<String>, owner: AttribOwner, storage: StorageType) -> Self {
        Self {
            name: name.into(),
            tuple_size: 1,
            owner,
            storage,
            is_array: true,
        }
    }
}

/// Immutable, interned list of attribute descriptions
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct AttribList {
    attribs: Vec<Attrib>,
    display_color: Option<usize>,
}

static ATTRIB_LISTS: Lazy<Mutex<FastSet<Arc<AttribList>>>> = Lazy::new(|| Mutex::new(FastSet::default()));

impl AttribList {
    /// Find or create the shared list with exactly this content
    pub fn find_list(attribs: Vec<Attrib>) -> Arc<Self> {
        let display_color = attribs.iter().position(|a| {
            a.name == DISPLAY_COLOR && a.tuple_size == 3 && a.storage.is_float() && !a.is_array
        });
        let candidate = Self { attribs, display_color };

        let mut table = ATTRIB_LISTS.lock();
        if let Some(existing) = table.get(&candidate) {
            return Arc::clone(existing);
        }
        let list = Arc::new(candidate);
        table.insert(Arc::clone(&list));
        list
    }

    /// The interned empty list
    pub fn empty() -> Arc<Self> {
        Self::find_list(Vec::new())
    }

    /// Drop intern table entries that nothing else holds
    ///
    /// Returns the number of lists released.
    pub fn purge_unused() -> usize {
        let mut table = ATTRIB_LISTS.lock();
        let before = table.len();
        table.retain(|list| Arc::strong_count(list) > 1);
        before - table.len()
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.attribs.len()
    }

    /// True for the empty layout
    pub fn is_empty(&self) -> bool {
        self.attribs.is_empty()
    }

    /// Attribute by index
    pub fn get(&self, index: usize) -> Option<&Attrib> {
        self.attribs.get(index)
    }

    /// Index of a named attribute
    pub fn find(&self, name: &str) -> Option<usize> {
        self.attribs.iter().position(|a| a.name == name)
    }

    /// Index of the display colour attribute, if the layout has one
    pub const fn display_color(&self) -> Option<usize> {
        self.display_color
    }

    /// All attribute descriptions in order
    pub fn attribs(&self) -> &[Attrib] {
        &self.attribs
    }

    /// Layout with one more attribute appended (or replaced when the name exists)
    pub fn with_attrib(&self, attrib: Attrib) -> Arc<Self> {
        let mut attribs = self.attribs.clone();
        match attribs.iter().position(|a| a.name == attrib.name) {
            Some(i) => attribs[i] = attrib,
            None => attribs.push(attrib),
        }
        Self::find_list(attribs)
    }
}

/// Raw attribute values, flattened tuple by tuple
#[derive(Debug, Clone, PartialEq)]
pub enum AttribValues {
    /// 32-bit integers
    Int32(Vec<i32>),
    /// 64-bit integers
    Int64(Vec<i64>),
    /// 32-bit floats
    Fp32(Vec<f32>),
    /// 64-bit floats
    Fp64(Vec<f64>),
    /// Strings
    String(Vec<String>),
}

impl AttribValues {
    /// Storage type of these values
    pub const fn storage(&self) -> StorageType {
        match self {
            Self::Int32(_) => StorageType::Int32,
            Self::Int64(_) => StorageType::Int64,
            Self::Fp32(_) => StorageType::Fp32,
            Self::Fp64(_) => StorageType::Fp64,
            Self::String(_) => StorageType::String,
        }
    }

    /// Number of scalars stored
    pub fn len(&self) -> usize {
        match self {
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Fp32(v) => v.len(),
            Self::Fp64(v) => v.len(),
            Self::String(v) => v.len(),
        }
    }

    /// True when no scalar is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Values of one attribute plus array offsets for array attributes
#[derive(Debug, Clone, PartialEq)]
pub struct AttribData {
    values: AttribValues,
    /// `offsets[i]..offsets[i + 1]` spans element `i` of an array attribute
    offsets: Option<Vec<u32>>,
}

impl AttribData {
    /// Scalars for one element
    fn span(&self, element: usize, tuple_size: usize) -> Option<std::ops::Range<usize>> {
        let range = match &self.offsets {
            Some(offsets) => {
                let start = *offsets.get(element)? as usize;
                let end = *offsets.get(element + 1)? as usize;
                start..end
            }
            None => element * tuple_size..(element + 1) * tuple_size,
        };
        (range.end <= self.values.len()).then_some(range)
    }

    /// The stored values
    pub const fn values(&self) -> &AttribValues {
        &self.values
    }
}

/// Errors raised while attaching attribute data to geometry
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AttribError {
    /// The value count does not match the owner class element count
    #[error("attribute `{name}` expects {expected} scalars, got {actual}")]
    CountMismatch {
        /// Attribute name
        name: String,
        /// Scalars required by the geometry
        expected: usize,
        /// Scalars supplied
        actual: usize,
    },
    /// Array offsets are not monotonic or out of bounds
    #[error("attribute `{0}` has malformed array offsets")]
    BadOffsets(String),
    /// Tuple size zero
    #[error("attribute `{0}` has a zero tuple size")]
    ZeroTupleSize(String),
}

/// Element counts per owner class, used to validate attribute sizes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementCounts {
    /// Number of points
    pub points: usize,
    /// Number of vertices (face corners)
    pub vertices: usize,
    /// Number of primitives
    pub primitives: usize,
}

impl ElementCounts {
    /// Element count for an owner class
    pub const fn for_owner(&self, owner: AttribOwner) -> usize {
        match owner {
            AttribOwner::Point => self.points,
            AttribOwner::Vertex => self.vertices,
            AttribOwner::Primitive => self.primitives,
            AttribOwner::Detail => 1,
        }
    }
}

/// Where on a geometry an attribute is being evaluated
///
/// `points`/`vertices` name the corners of the struck triangle or segment,
/// `weights` are their interpolation weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttribLookup {
    /// Primitive index
    pub primitive: usize,
    /// Point indices of the corners
    pub points: [usize; 3],
    /// Vertex indices of the corners
    pub vertices: [usize; 3],
    /// Barycentric weights of the corners
    pub weights: [f32; 3],
}

impl AttribLookup {
    /// Corner carrying the largest weight, used for non-interpolated storage
    fn nearest_corner(&self) -> usize {
        let w = self.weights;
        if w[0] >= w[1] && w[0] >= w[2] {
            0
        } else if w[1] >= w[2] {
            1
        } else {
            2
        }
    }

    fn element(&self, owner: AttribOwner, corner: usize) -> usize {
        match owner {
            AttribOwner::Point => self.points[corner],
            AttribOwner::Vertex => self.vertices[corner],
            AttribOwner::Primitive => self.primitive,
            AttribOwner::Detail => 0,
        }
    }
}

/// Scalar types that attribute evaluation can produce
pub trait AttribScalar: Clone + Sized {
    /// Values of this scalar type, if the storage matches
    fn values(values: &AttribValues) -> Option<&[Self]>;

    /// Weighted blend of corner tuples into `out`; `None` when the type
    /// cannot be interpolated
    fn blend(_corners: [&[Self]; 3], _weights: [f32; 3], _out: &mut Vec<Self>) -> Option<()> {
        None
    }
}

impl AttribScalar for i32 {
    fn values(values: &AttribValues) -> Option<&[Self]> {
        match values {
            AttribValues::Int32(v) => Some(v),
            _ => None,
        }
    }
}

impl AttribScalar for i64 {
    fn values(values: &AttribValues) -> Option<&[Self]> {
        match values {
            AttribValues::Int64(v) => Some(v),
            _ => None,
        }
    }
}

impl AttribScalar for String {
    fn values(values: &AttribValues) -> Option<&[Self]> {
        match values {
            AttribValues::String(v) => Some(v),
            _ => None,
        }
    }
}

impl AttribScalar for f32 {
    fn values(values: &AttribValues) -> Option<&[Self]> {
        match values {
            AttribValues::Fp32(v) => Some(v),
            _ => None,
        }
    }

    fn blend(corners: [&[Self]; 3], weights: [f32; 3], out: &mut Vec<Self>) -> Option<()> {
        out.clear();
        out.extend((0..corners[0].len()).map(|i| {
            corners[0][i] * weights[0] + corners[1][i] * weights[1] + corners[2][i] * weights[2]
        }));
        Some(())
    }
}

impl AttribScalar for f64 {
    fn values(values: &AttribValues) -> Option<&[Self]> {
        match values {
            AttribValues::Fp64(v) => Some(v),
            _ => None,
        }
    }

    fn blend(corners: [&[Self]; 3], weights: [f32; 3], out: &mut Vec<Self>) -> Option<()> {
        let w = weights.map(f64::from);
        out.clear();
        out.extend((0..corners[0].len()).map(|i| corners[0][i] * w[0] + corners[1][i] * w[1] + corners[2][i] * w[2]));
        Some(())
    }
}

/// Attribute layout plus the matching value arrays of one geometry
#[derive(Debug, Clone, PartialEq)]
pub struct AttribSet {
    list: Arc<AttribList>,
    data: Vec<AttribData>,
}

impl Default for AttribSet {
    fn default() -> Self {
        Self {
            list: AttribList::empty(),
            data: Vec::new(),
        }
    }
}

impl AttribSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// The interned layout
    pub const fn list(&self) -> &Arc<AttribList> {
        &self.list
    }

    /// Values of attribute `index`
    pub fn data(&self, index: usize) -> Option<&AttribData> {
        self.data.get(index)
    }

    /// Add or replace a fixed-size attribute
    pub fn set(
        &mut self,
        name: &str,
        owner: AttribOwner,
        tuple_size: u32,
        values: AttribValues,
        counts: ElementCounts,
    ) -> Result<(), AttribError> {
        if tuple_size == 0 {
            return Err(AttribError::ZeroTupleSize(name.to_string()));
        }
        let expected = counts.for_owner(owner) * tuple_size as usize;
        if values.len() != expected {
            return Err(AttribError::CountMismatch {
                name: name.to_string(),
                expected,
                actual: values.len(),
            });
        }
        let attrib = Attrib::new(name, tuple_size, owner, values.storage());
        self.insert(attrib, AttribData { values, offsets: None });
        Ok(())
    }

    /// Add or replace an array attribute
    pub fn set_array(
        &mut self,
        name: &str,
        owner: AttribOwner,
        values: AttribValues,
        offsets: Vec<u32>,
        counts: ElementCounts,
    ) -> Result<(), AttribError> {
        let elements = counts.for_owner(owner);
        let well_formed = offsets.len() == elements + 1
            && offsets.first() == Some(&0)
            && offsets.windows(2).all(|w| w[0] <= w[1])
            && offsets.last().map(|&end| end as usize) == Some(values.len());
        if !well_formed {
            return Err(AttribError::BadOffsets(name.to_string()));
        }
        let attrib = Attrib::array(name, owner, values.storage());
        self.insert(
            attrib,
            AttribData {
                values,
                offsets: Some(offsets),
            },
        );
        Ok(())
    }

    fn insert(&mut self, attrib: Attrib, data: AttribData) {
        match self.list.find(&attrib.name) {
            Some(index) => self.data[index] = data,
            None => self.data.push(data),
        }
        self.list = self.list.with_attrib(attrib);
    }

    /// Check every attribute still fits the geometry element counts
    pub fn validate(&self, counts: ElementCounts) -> Result<(), AttribError> {
        for (attrib, data) in self.list.attribs().iter().zip(&self.data) {
            let elements = counts.for_owner(attrib.owner);
            match &data.offsets {
                Some(offsets) if offsets.len() != elements + 1 => {
                    return Err(AttribError::BadOffsets(attrib.name.clone()));
                }
                Some(_) => {}
                None => {
                    let expected = elements * attrib.tuple_size as usize;
                    if data.values.len() != expected {
                        return Err(AttribError::CountMismatch {
                            name: attrib.name.clone(),
                            expected,
                            actual: data.values.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluate attribute `index` at a lookup location.
    ///
    /// Point and vertex float attributes are interpolated into `scratch`;
    /// everything else is returned straight from storage, taking the
    /// heaviest corner for point and vertex classes.
    pub fn eval<'a, T: AttribScalar>(
        &'a self,
        index: usize,
        lookup: &AttribLookup,
        scratch: &'a mut Vec<T>,
    ) -> Option<&'a [T]> {
        let attrib = self.list.get(index)?;
        let data = self.data.get(index)?;
        let values = T::values(&data.values)?;
        let tuple = attrib.tuple_size as usize;

        let per_corner = matches!(attrib.owner, AttribOwner::Point | AttribOwner::Vertex);
        if per_corner && !attrib.is_array && attrib.storage.is_float() {
            let corner = |c: usize| {
                data.span(lookup.element(attrib.owner, c), tuple)
                    .map(|span| &values[span])
            };
            let corners = [corner(0)?, corner(1)?, corner(2)?];
            if T::blend(corners, lookup.weights, scratch).is_some() {
                return Some(scratch.as_slice());
            }
        }

        let element = lookup.element(attrib.owner, lookup.nearest_corner());
        let span = data.span(element, tuple)?;
        Some(&values[span])
    }
}
