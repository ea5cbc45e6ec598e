//! Stripe driver.
//!
//! Splits an output region into full-width stripes of `stripe_height` rows and
//! renders them in parallel, the way a host calls `render_stripe` from its
//! worker threads.

use rayon::prelude::*;

use crate::error::NodeResult;
use crate::node::OcioBlinkNode;
use crate::plane::{Box2, ChannelSet, ImagePlane, MemoryImage, PlaneDescriptor};

/// Renders whole images through a node, stripe by stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileScheduler {
    stripe_height: u32,
    packed: bool,
}

impl TileScheduler {
    /// Scheduler producing packed stripes.
    pub fn new(stripe_height: u32) -> Self {
        Self {
            stripe_height: stripe_height.max(1),
            packed: true,
        }
    }

    /// Scheduler using the node's stripe height.
    pub fn for_node(node: &OcioBlinkNode) -> Self {
        Self::new(node.stripe_height())
    }

    /// Render planar instead of packed stripes.
    pub fn planar(mut self) -> Self {
        self.packed = false;
        self
    }

    pub fn stripe_height(&self) -> u32 {
        self.stripe_height
    }

    /// Full-width stripes covering `bounds`, bottom to top.
    pub fn stripes(&self, bounds: Box2) -> Vec<Box2> {
        if bounds.is_empty() {
            return Vec::new();
        }
        let height = i32::try_from(self.stripe_height).unwrap_or(i32::MAX);
        (bounds.y..bounds.t)
            .step_by(height as usize)
            .map(|y| bounds.rows(y, y.saturating_add(height)))
            .collect()
    }

    /// Renders `bounds` x `channels`. The first failing stripe's error is
    /// returned; each failure has already been reported by the node.
    pub fn render(
        &self,
        node: &OcioBlinkNode,
        bounds: Box2,
        channels: &ChannelSet,
    ) -> NodeResult<MemoryImage> {
        let stripes = self.stripes(bounds);
        tracing::debug!(
            bounds = %bounds,
            stripes = stripes.len(),
            stripe_height = self.stripe_height,
            "rendering"
        );

        let planes = stripes
            .into_par_iter()
            .map(|stripe| -> NodeResult<ImagePlane> {
                let desc = PlaneDescriptor::new(stripe, self.packed, channels.clone(), channels.len());
                let mut plane = ImagePlane::new(desc);
                node.render_stripe(&mut plane)?;
                Ok(plane)
            })
            .collect::<NodeResult<Vec<_>>>()?;

        let mut image = MemoryImage::new(bounds, channels.clone());
        for plane in &planes {
            image.write_plane(plane);
        }
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripes_cover_bounds() {
        let bounds = Box2::new(0, 3, 10, 10);
        let stripes = TileScheduler::new(3).stripes(bounds);
        assert_eq!(
            stripes,
            [Box2::new(0, 3, 10, 6), Box2::new(0, 6, 10, 9), Box2::new(0, 9, 10, 10)]
        );
        assert_eq!(TileScheduler::new(1).stripes(bounds).len(), 7);
        assert!(TileScheduler::new(4).stripes(Box2::new(0, 0, 0, 5)).is_empty());
    }

    #[test]
    fn tall_stripes_clamp_to_bounds() {
        let bounds = Box2::new(0, 0, 4, 3);
        assert_eq!(TileScheduler::new(3_000_000_000).stripes(bounds), [bounds]);
        assert_eq!(TileScheduler::new(u32::MAX).stripes(Box2::new(0, -5, 4, 7)), [Box2::new(0, -5, 4, 7)]);
    }

    #[test]
    fn zero_height_is_one_row() {
        assert_eq!(TileScheduler::new(0).stripe_height(), 1);
    }
}
