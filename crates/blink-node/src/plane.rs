//! Host image planes.
//!
//! An [`ImagePlane`] is a rectangular, channel-tagged f32 buffer, stored
//! packed (channels interleaved per pixel) or planar (one contiguous plane
//! per channel). Storage is reference counted so a source can hand out its
//! own buffer without copying; [`ImagePlane::make_unique`] detaches it and
//! [`ImagePlane::make_writable`] grants write access.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{NodeResult, PlaneError};

/// Half-open pixel bounds `[x, r) x [y, t)`.
///
/// ```
/// use blink_node::Box2;
///
/// let b = Box2::new(10, 20, 110, 70);
/// assert_eq!((b.width(), b.height()), (100, 50));
/// assert_eq!(b.area(), 5000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Box2 {
    pub x: i32,
    pub y: i32,
    pub r: i32,
    pub t: i32,
}

impl Box2 {
    #[inline]
    pub const fn new(x: i32, y: i32, r: i32, t: i32) -> Self {
        Self { x, y, r, t }
    }

    /// Bounds `[0, width) x [0, height)`.
    #[inline]
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        (self.r - self.x).max(0) as u32
    }

    #[inline]
    pub fn height(&self) -> u32 {
        (self.t - self.y).max(0) as u32
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.r && y >= self.y && y < self.t
    }

    /// Overlap of two boxes; empty boxes come back as `None`.
    pub fn intersect(&self, other: &Box2) -> Option<Box2> {
        let b = Box2::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.r.min(other.r),
            self.t.min(other.t),
        );
        (!b.is_empty()).then_some(b)
    }

    /// Rows `[y0, y1)` of this box, full width.
    pub fn rows(&self, y0: i32, y1: i32) -> Box2 {
        Box2::new(self.x, y0.max(self.y), self.r, y1.min(self.t))
    }
}

impl fmt::Display for Box2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x, self.y, self.r, self.t)
    }
}

/// Channel tag. Ordering is red, green, blue, alpha, depth, then others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Red,
    Green,
    Blue,
    Alpha,
    Depth,
    Other(u16),
}

impl Channel {
    pub fn name(&self) -> String {
        match self {
            Self::Red => "rgba.red".into(),
            Self::Green => "rgba.green".into(),
            Self::Blue => "rgba.blue".into(),
            Self::Alpha => "rgba.alpha".into(),
            Self::Depth => "depth.Z".into(),
            Self::Other(n) => format!("other.{n}"),
        }
    }
}

/// Ordered set of channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChannelSet(BTreeSet<Channel>);

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rgb() -> Self {
        [Channel::Red, Channel::Green, Channel::Blue].into_iter().collect()
    }

    pub fn rgba() -> Self {
        [Channel::Red, Channel::Green, Channel::Blue, Channel::Alpha]
            .into_iter()
            .collect()
    }

    pub fn insert(&mut self, channel: Channel) -> bool {
        self.0.insert(channel)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.0.contains(&channel)
    }

    /// True if red, green and blue are all present.
    pub fn has_rgb(&self) -> bool {
        self.contains(Channel::Red) && self.contains(Channel::Green) && self.contains(Channel::Blue)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        self.0.iter().copied()
    }

    /// Position of `channel` in iteration order.
    pub fn index_of(&self, channel: Channel) -> Option<usize> {
        self.0.iter().position(|&c| c == channel)
    }

    pub fn intersection(&self, other: &ChannelSet) -> ChannelSet {
        ChannelSet(self.0.intersection(&other.0).copied().collect())
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Shape of an image plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneDescriptor {
    pub bounds: Box2,
    pub packed: bool,
    pub channels: ChannelSet,
    /// Floats per pixel; at least `channels.len()`.
    pub n_comps: usize,
}

impl PlaneDescriptor {
    pub fn new(bounds: Box2, packed: bool, channels: ChannelSet, n_comps: usize) -> Self {
        Self {
            bounds,
            packed,
            channels,
            n_comps,
        }
    }

    /// Packed plane with one component per channel.
    pub fn packed(bounds: Box2, channels: ChannelSet) -> Self {
        let n = channels.len();
        Self::new(bounds, true, channels, n)
    }

    /// Planar plane with one component per channel.
    pub fn planar(bounds: Box2, channels: ChannelSet) -> Self {
        let n = channels.len();
        Self::new(bounds, false, channels, n)
    }

    /// Floats needed to store the plane.
    pub fn len(&self) -> usize {
        self.bounds.area() * self.n_comps
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer offset of component `comp` at absolute pixel `(x, y)`.
    pub fn offset(&self, x: i32, y: i32, comp: usize) -> Option<usize> {
        if !self.bounds.contains(x, y) || comp >= self.n_comps {
            return None;
        }
        let w = self.bounds.width() as usize;
        let px = (y - self.bounds.y) as usize * w + (x - self.bounds.x) as usize;
        Some(if self.packed {
            px * self.n_comps + comp
        } else {
            comp * self.bounds.area() + px
        })
    }
}

/// A tile of pixel data owned by one render call.
#[derive(Clone)]
pub struct ImagePlane {
    desc: PlaneDescriptor,
    data: Arc<Vec<f32>>,
    writable: bool,
}

impl fmt::Debug for ImagePlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePlane")
            .field("desc", &self.desc)
            .field("writable", &self.writable)
            .field("shared", &!self.is_unique())
            .finish()
    }
}

impl ImagePlane {
    /// Zero-filled, read-only plane.
    pub fn new(desc: PlaneDescriptor) -> Self {
        let data = Arc::new(vec![0.0; desc.len()]);
        Self {
            desc,
            data,
            writable: false,
        }
    }

    /// Plane over existing (possibly shared) storage.
    pub fn from_shared(desc: PlaneDescriptor, data: Arc<Vec<f32>>) -> Result<Self, PlaneError> {
        if data.len() != desc.len() {
            return Err(PlaneError::Shape(format!(
                "buffer holds {} floats, {} x {} comps needs {}",
                data.len(),
                desc.bounds,
                desc.n_comps,
                desc.len()
            )));
        }
        if desc.n_comps < desc.channels.len() {
            return Err(PlaneError::Shape(format!(
                "{} channels do not fit in {} components",
                desc.channels.len(),
                desc.n_comps
            )));
        }
        Ok(Self {
            desc,
            data,
            writable: false,
        })
    }

    pub fn from_vec(desc: PlaneDescriptor, data: Vec<f32>) -> Result<Self, PlaneError> {
        Self::from_shared(desc, Arc::new(data))
    }

    pub fn desc(&self) -> &PlaneDescriptor {
        &self.desc
    }

    pub fn bounds(&self) -> Box2 {
        self.desc.bounds
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.desc.channels
    }

    pub fn n_comps(&self) -> usize {
        self.desc.n_comps
    }

    pub fn packed(&self) -> bool {
        self.desc.packed
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// True if no other plane shares this storage.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.data) == 1
    }

    /// Detaches shared storage by copying it.
    pub fn make_unique(&mut self) {
        Arc::make_mut(&mut self.data);
    }

    /// Grants write access; detaches shared storage first.
    pub fn make_writable(&mut self) {
        self.make_unique();
        self.writable = true;
    }

    /// Mutable storage. Requires [`make_writable`](Self::make_writable).
    pub fn data_mut(&mut self) -> Result<&mut [f32], PlaneError> {
        if !self.writable {
            return Err(PlaneError::NotWritable);
        }
        Arc::get_mut(&mut self.data)
            .map(|v| v.as_mut_slice())
            .ok_or(PlaneError::Shared)
    }

    /// Replaces the storage, e.g. with data fetched from a source.
    pub fn replace_storage(&mut self, data: Arc<Vec<f32>>) -> Result<(), PlaneError> {
        *self = Self::from_shared(self.desc.clone(), data)?;
        Ok(())
    }

    /// Component `comp` at absolute pixel `(x, y)`.
    pub fn at(&self, x: i32, y: i32, comp: usize) -> Option<f32> {
        self.desc.offset(x, y, comp).map(|i| self.data[i])
    }

    /// Value of `channel` at absolute pixel `(x, y)`.
    pub fn channel_at(&self, x: i32, y: i32, channel: Channel) -> Option<f32> {
        let comp = self.desc.channels.index_of(channel)?;
        self.at(x, y, comp)
    }
}

/// Anything a plane can be fetched from.
pub trait PlaneSource: Send + Sync {
    /// Bounds of the available image.
    fn bounds(&self) -> Box2;

    /// Channels the source provides.
    fn channels(&self) -> ChannelSet;

    /// Fills `plane` with the source's pixels for the plane's bounds and
    /// channels. Pixels or channels the source lacks read as zero. The plane
    /// comes back read-only.
    fn fetch_plane(&self, plane: &mut ImagePlane) -> NodeResult<()>;
}

/// A packed in-memory image.
///
/// ```
/// use blink_node::{Box2, ChannelSet, ImagePlane, MemoryImage, PlaneDescriptor, PlaneSource};
///
/// let image = MemoryImage::filled(Box2::from_size(4, 2), ChannelSet::rgba(), 0.5);
/// let mut plane = ImagePlane::new(PlaneDescriptor::packed(Box2::new(0, 0, 4, 1), ChannelSet::rgb()));
/// image.fetch_plane(&mut plane).unwrap();
/// assert_eq!(plane.data(), &[0.5; 12]);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryImage {
    desc: PlaneDescriptor,
    data: Arc<Vec<f32>>,
}

impl MemoryImage {
    /// Zero-filled image.
    pub fn new(bounds: Box2, channels: ChannelSet) -> Self {
        Self::filled(bounds, channels, 0.0)
    }

    pub fn filled(bounds: Box2, channels: ChannelSet, value: f32) -> Self {
        let desc = PlaneDescriptor::packed(bounds, channels);
        let data = Arc::new(vec![value; desc.len()]);
        Self { desc, data }
    }

    /// Wraps packed `data` laid out row by row, channels in set order.
    pub fn from_vec(bounds: Box2, channels: ChannelSet, data: Vec<f32>) -> Result<Self, PlaneError> {
        let desc = PlaneDescriptor::packed(bounds, channels);
        if data.len() != desc.len() {
            return Err(PlaneError::Shape(format!(
                "image buffer holds {} floats, needs {}",
                data.len(),
                desc.len()
            )));
        }
        Ok(Self {
            desc,
            data: Arc::new(data),
        })
    }

    pub fn descriptor(&self) -> &PlaneDescriptor {
        &self.desc
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value of `channel` at `(x, y)`, zero outside the image.
    pub fn get(&self, x: i32, y: i32, channel: Channel) -> f32 {
        self.desc
            .channels
            .index_of(channel)
            .and_then(|c| self.desc.offset(x, y, c))
            .map_or(0.0, |i| self.data[i])
    }

    /// Sets `channel` at `(x, y)`; ignored outside the image.
    pub fn set(&mut self, x: i32, y: i32, channel: Channel, value: f32) {
        let offset = self
            .desc
            .channels
            .index_of(channel)
            .and_then(|c| self.desc.offset(x, y, c));
        if let Some(i) = offset {
            Arc::make_mut(&mut self.data)[i] = value;
        }
    }

    /// Copies the channels of `plane` this image also has, over the overlap
    /// of their bounds.
    pub fn write_plane(&mut self, plane: &ImagePlane) {
        let Some(area) = self.desc.bounds.intersect(&plane.bounds()) else {
            return;
        };
        let pairs: Vec<(usize, usize)> = plane
            .channels()
            .iter()
            .enumerate()
            .filter_map(|(src, ch)| self.desc.channels.index_of(ch).map(|dst| (src, dst)))
            .collect();

        let desc = self.desc.clone();
        let data = Arc::make_mut(&mut self.data);
        for y in area.y..area.t {
            for x in area.x..area.r {
                for &(src, dst) in &pairs {
                    if let (Some(v), Some(i)) = (plane.at(x, y, src), desc.offset(x, y, dst)) {
                        data[i] = v;
                    }
                }
            }
        }
    }
}

impl PlaneSource for MemoryImage {
    fn bounds(&self) -> Box2 {
        self.desc.bounds
    }

    fn channels(&self) -> ChannelSet {
        self.desc.channels.clone()
    }

    fn fetch_plane(&self, plane: &mut ImagePlane) -> NodeResult<()> {
        // Same shape: hand out the image's own storage.
        if *plane.desc() == self.desc {
            plane.replace_storage(Arc::clone(&self.data))?;
            return Ok(());
        }

        let desc = plane.desc().clone();
        let mut data = vec![0.0; desc.len()];
        for (comp, channel) in desc.channels.iter().enumerate() {
            for y in desc.bounds.y..desc.bounds.t {
                for x in desc.bounds.x..desc.bounds.r {
                    if let Some(i) = desc.offset(x, y, comp) {
                        data[i] = self.get(x, y, channel);
                    }
                }
            }
        }
        plane.replace_storage(Arc::new(data))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_intersection() {
        let a = Box2::new(0, 0, 100, 100);
        let b = Box2::new(50, 50, 150, 150);
        assert_eq!(a.intersect(&b), Some(Box2::new(50, 50, 100, 100)));
        assert_eq!(a.intersect(&Box2::new(100, 0, 200, 10)), None);
        assert!(Box2::new(5, 5, 5, 9).is_empty());
        assert_eq!(a.rows(10, 11), Box2::new(0, 10, 100, 11));
    }

    #[test]
    fn channel_order_is_rgba_first() {
        let set: ChannelSet = [Channel::Other(3), Channel::Alpha, Channel::Blue, Channel::Red, Channel::Green]
            .into_iter()
            .collect();
        let order: Vec<_> = set.iter().collect();
        assert_eq!(
            order,
            [Channel::Red, Channel::Green, Channel::Blue, Channel::Alpha, Channel::Other(3)]
        );
        assert!(set.has_rgb());
        assert!(!ChannelSet::from_iter([Channel::Alpha]).has_rgb());
    }

    #[test]
    fn packed_and_planar_offsets() {
        let bounds = Box2::new(10, 20, 12, 22);
        let packed = PlaneDescriptor::packed(bounds, ChannelSet::rgb());
        let planar = PlaneDescriptor::planar(bounds, ChannelSet::rgb());
        assert_eq!(packed.offset(11, 21, 2), Some(3 * 3 + 2));
        assert_eq!(planar.offset(11, 21, 2), Some(2 * 4 + 3));
        assert_eq!(packed.offset(12, 21, 0), None);
    }

    #[test]
    fn writes_need_make_writable() {
        let mut plane = ImagePlane::new(PlaneDescriptor::packed(Box2::from_size(2, 1), ChannelSet::rgb()));
        assert_eq!(plane.data_mut().unwrap_err(), PlaneError::NotWritable);
        plane.make_writable();
        plane.data_mut().unwrap()[0] = 1.0;
        assert_eq!(plane.at(0, 0, 0), Some(1.0));
    }

    #[test]
    fn make_unique_detaches_shared_storage() {
        let image = MemoryImage::filled(Box2::from_size(2, 2), ChannelSet::rgb(), 0.25);
        let mut plane = ImagePlane::new(image.descriptor().clone());
        image.fetch_plane(&mut plane).unwrap();
        assert!(!plane.is_unique());

        plane.make_writable();
        assert!(plane.is_unique());
        plane.data_mut().unwrap().fill(1.0);
        assert_eq!(image.data(), &[0.25; 12]);
    }

    #[test]
    fn fetch_zero_fills_missing_pixels_and_channels() {
        let image = MemoryImage::filled(Box2::from_size(1, 1), ChannelSet::rgb(), 0.5);
        let mut plane = ImagePlane::new(PlaneDescriptor::planar(Box2::new(0, 0, 2, 1), ChannelSet::rgba()));
        image.fetch_plane(&mut plane).unwrap();
        assert_eq!(plane.channel_at(0, 0, Channel::Green), Some(0.5));
        assert_eq!(plane.channel_at(0, 0, Channel::Alpha), Some(0.0));
        assert_eq!(plane.channel_at(1, 0, Channel::Red), Some(0.0));
    }

    #[test]
    fn write_plane_copies_overlap() {
        let mut image = MemoryImage::new(Box2::from_size(2, 2), ChannelSet::rgba());
        let plane = ImagePlane::from_vec(
            PlaneDescriptor::packed(Box2::new(1, 1, 3, 2), ChannelSet::rgb()),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .unwrap();
        image.write_plane(&plane);
        assert_eq!(image.get(1, 1, Channel::Green), 2.0);
        assert_eq!(image.get(1, 1, Channel::Alpha), 0.0);
        assert_eq!(image.get(0, 0, Channel::Red), 0.0);
    }
}
