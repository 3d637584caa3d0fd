//! Stroke rendering collaborator.
//!
//! The core stores stroke points and never rasterizes them. Whatever draws
//! pixels (a browser canvas, a headless PNG exporter) implements
//! [`StrokeRenderer`] and is driven by
//! [`DrawingProjection::render_to`](crate::DrawingProjection::render_to).

use crate::event::DrawingStroke;

pub trait StrokeRenderer {
    /// Wipe the canvas back to its background.
    fn clear(&mut self);

    /// Paint one stroke on top of everything drawn so far.
    fn draw_stroke(&mut self, stroke: &DrawingStroke);
}
