//! Render command records and the per-frame command list
//!
//! The front end appends typed records to a [`RenderCommandList`]; the back
//! end walks them in order until [`RenderCommand::EndOfList`].
//!
//! # Capacity Accounting
//!
//! Every record has a byte footprint: an 8 byte header plus its payload
//! size rounded up to 8. The list refuses records once `used + footprint`
//! would eat into the tail kept for the frame's `SwapBuffers` and
//! `EndOfList` records, so a frame always closes properly. Refused records
//! are dropped silently; only a record that could never fit even in an
//! empty list is an error.
//!
//! Records only carry plain data. Variable sized payloads (2D polygon
//! vertices, entities) live in arenas owned by the frame and are referenced
//! by [`ArenaSpan`].

use std::mem::size_of;

use bitflags::bitflags;

use crate::foundation::math::{Axis, Mat4, Vec3};
use crate::render::device::{DrawBufferTarget, Rect, VideoCapture};
use crate::render::resources::texture_manager::TextureKey;
use crate::render::{RenderError, RenderResult};

/// Header bytes charged per record
pub const COMMAND_HEADER_SIZE: usize = 8;

/// Byte footprint of a record with a payload of `payload` bytes
pub const fn command_footprint(payload: usize) -> usize {
    COMMAND_HEADER_SIZE + (payload + 7) / 8 * 8
}

/// Opaque material reference resolved by the back end through the shader table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShaderHandle(pub u32);

impl ShaderHandle {
    /// The default shader
    pub const DEFAULT: Self = Self(0);
}

/// Opaque portal surface reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SurfaceHandle(pub u32);

/// Range of elements in a frame arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaSpan {
    /// First element
    pub first: u32,
    /// Number of elements
    pub count: u32,
}

impl ArenaSpan {
    /// Create a span
    pub const fn new(first: u32, count: u32) -> Self {
        Self { first, count }
    }

    /// As a slice range
    pub const fn range(&self) -> std::ops::Range<usize> {
        self.first as usize..(self.first + self.count) as usize
    }
}

bitflags! {
    /// Per-view flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ViewFlags: u32 {
        /// Do not draw the world, only entities (HUD models)
        const NO_WORLD_MODEL = 1 << 0;
        /// Teleport effect view
        const HYPERSPACE = 1 << 2;
        /// Skip shadow passes
        const NO_SHADOWS = 1 << 6;
        /// Skip the bloom chain
        const NO_BLOOM = 1 << 7;
    }
}

/// Everything the back end needs to draw one view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewDef {
    /// Viewport in window pixels
    pub viewport: Rect,
    /// Horizontal field of view in degrees
    pub fov_x: f32,
    /// Vertical field of view in degrees
    pub fov_y: f32,
    /// Eye position
    pub origin: Vec3,
    /// Eye basis
    pub axis: Axis,
    /// Scene time in msec
    pub time: i32,
    /// View flags
    pub flags: ViewFlags,
    /// Nesting depth of portal views, 0 for the main view
    pub portal_level: u8,
}

impl Default for ViewDef {
    fn default() -> Self {
        Self {
            viewport: Rect::default(),
            fov_x: 90.0,
            fov_y: 73.74,
            origin: Vec3::zeros(),
            axis: Axis::identity(),
            time: 0,
            flags: ViewFlags::empty(),
            portal_level: 0,
        }
    }
}

/// Screen rectangle and texture coordinates of a 2D pic
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PicRect {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub w: f32,
    /// Height
    pub h: f32,
    /// Left texture coordinate
    pub s1: f32,
    /// Top texture coordinate
    pub t1: f32,
    /// Right texture coordinate
    pub s2: f32,
    /// Bottom texture coordinate
    pub t2: f32,
}

impl PicRect {
    /// Create a pic rectangle
    pub const fn new(x: f32, y: f32, w: f32, h: f32, s1: f32, t1: f32, s2: f32, t2: f32) -> Self {
        Self { x, y, w, h, s1, t1, s2, t2 }
    }
}

/// Direction of a gradient pic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientType {
    /// Current color at the top, gradient color at the bottom
    #[default]
    Vertical,
    /// Current color on the left, gradient color on the right
    Horizontal,
}

/// A record type that can be appended to a [`RenderCommandList`]
pub trait CommandRecord: Copy + Into<RenderCommand> {
    /// Bytes this record takes from the command buffer
    const SIZE: usize = command_footprint(size_of::<Self>());
}

macro_rules! command_records {
    ($($variant:ident($record:ident)),+ $(,)?) => {
        /// One recorded command
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub enum RenderCommand {
            $(
                #[allow(missing_docs)]
                $variant($record),
            )+
        }

        impl RenderCommand {
            /// Bytes this command took from the command buffer
            pub const fn footprint(&self) -> usize {
                match self {
                    $(Self::$variant(_) => <$record as CommandRecord>::SIZE,)+
                }
            }
        }

        $(
            impl From<$record> for RenderCommand {
                fn from(record: $record) -> Self {
                    Self::$variant(record)
                }
            }

            impl CommandRecord for $record {}
        )+
    };
}

/// Set up tiled lights for a view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetupLightsCommand {
    /// View to light
    pub view: ViewDef,
}

/// Draw the world and the frame's entities for a view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawViewCommand {
    /// View to draw
    pub view: ViewDef,
    /// Depth only pre-pass
    pub depth_pass: bool,
    /// Entities submitted for this view
    pub entities: ArenaSpan,
}

/// Clear the main render target for a view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearBufferCommand {
    /// View being cleared
    pub view: ViewDef,
}

/// Mark the stencil area of a portal surface before its view is drawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreparePortalCommand {
    /// Parent view
    pub view: ViewDef,
    /// Portal surface
    pub surface: SurfaceHandle,
}

/// Restore stencil and depth after a portal view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalisePortalCommand {
    /// Parent view
    pub view: ViewDef,
    /// Portal surface
    pub surface: SurfaceHandle,
}

/// Bloom, tone mapping and color grading for a view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessCommand {
    /// View being finished
    pub view: ViewDef,
}

/// Set the 2D draw color
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetColorCommand {
    /// RGBA, 0..1
    pub color: [f32; 4],
}

/// Select a color grading image for one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetColorGradingCommand {
    /// Slot 0..=3
    pub slot: u8,
    /// Grading image
    pub image: TextureKey,
}

/// Axis aligned 2D pic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchPicCommand {
    /// Material
    pub shader: ShaderHandle,
    /// Placement
    pub pic: PicRect,
}

/// 2D pic rotated around its center
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedPicCommand {
    /// Material
    pub shader: ShaderHandle,
    /// Placement
    pub pic: PicRect,
    /// Rotation in degrees
    pub angle: f32,
}

/// 2D pic blending from the current color to a second color
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientPicCommand {
    /// Material
    pub shader: ShaderHandle,
    /// Placement
    pub pic: PicRect,
    /// Color at the far edge
    pub gradient_color: [u8; 4],
    /// Direction
    pub gradient_type: GradientType,
}

/// Triangle fan of 2D vertices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poly2dCommand {
    /// Material
    pub shader: ShaderHandle,
    /// Vertices in the frame's polygon arena
    pub verts: ArenaSpan,
}

/// Indexed 2D triangles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poly2dIndexedCommand {
    /// Material
    pub shader: ShaderHandle,
    /// Vertices in the frame's polygon arena
    pub verts: ArenaSpan,
    /// Indexes in the frame's index arena
    pub indexes: ArenaSpan,
    /// Offset added to every vertex
    pub translation: [i32; 2],
}

/// Set the scissor rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorSetCommand {
    /// Scissor in window pixels
    pub rect: Rect,
}

/// Transform subsequent 2D geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetMatrixTransformCommand {
    /// Transform applied to 2D vertices
    pub matrix: Mat4,
}

/// Drop the 2D transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetMatrixTransformCommand;

/// Select the draw buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawBufferCommand {
    /// Target buffer
    pub target: DrawBufferTarget,
}

/// Present the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapBuffersCommand;

/// Capture the frame for video recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFrameCommand {
    /// Capture parameters
    pub capture: VideoCapture,
}

/// Terminates a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfListCommand;

command_records! {
    SetupLights(SetupLightsCommand),
    DrawView(DrawViewCommand),
    ClearBuffer(ClearBufferCommand),
    PreparePortal(PreparePortalCommand),
    FinalisePortal(FinalisePortalCommand),
    PostProcess(PostProcessCommand),
    SetColor(SetColorCommand),
    SetColorGrading(SetColorGradingCommand),
    StretchPic(StretchPicCommand),
    RotatedPic(RotatedPicCommand),
    GradientPic(GradientPicCommand),
    Poly2d(Poly2dCommand),
    Poly2dIndexed(Poly2dIndexedCommand),
    ScissorSet(ScissorSetCommand),
    SetMatrixTransform(SetMatrixTransformCommand),
    ResetMatrixTransform(ResetMatrixTransformCommand),
    DrawBuffer(DrawBufferCommand),
    SwapBuffers(SwapBuffersCommand),
    VideoFrame(VideoFrameCommand),
    EndOfList(EndOfListCommand),
}

/// Bytes kept free for the closing `SwapBuffers` and `EndOfList` records
pub const RESERVED_TAIL: usize = SwapBuffersCommand::SIZE + EndOfListCommand::SIZE;

/// Append-only command list with a fixed byte budget
#[derive(Debug, Clone)]
pub struct RenderCommandList {
    commands: Vec<RenderCommand>,
    used: usize,
    capacity: usize,
    swap_recorded: bool,
    finalized: bool,
}

impl RenderCommandList {
    /// Create an empty list with a budget of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            commands: Vec::new(),
            used: 0,
            capacity,
            swap_recorded: false,
            finalized: false,
        }
    }

    /// Reserve room for `record` and append it.
    ///
    /// Returns `Ok(None)` when the frame is out of room; the record is
    /// dropped and `used` is unchanged.
    pub fn get_render_command<T: CommandRecord>(
        &mut self,
        record: T,
    ) -> RenderResult<Option<&mut RenderCommand>> {
        let usable = self.capacity.saturating_sub(RESERVED_TAIL);
        if T::SIZE > usable {
            return Err(RenderError::CommandTooLarge {
                bytes: T::SIZE,
                capacity: usable,
            });
        }
        if self.finalized || self.used + T::SIZE > usable {
            return Ok(None);
        }

        self.used += T::SIZE;
        self.commands.push(record.into());
        Ok(self.commands.last_mut())
    }

    /// Append the frame's `SwapBuffers` from the reserved tail.
    ///
    /// Only the first call per frame records anything.
    pub fn push_swap_buffers(&mut self) -> bool {
        if self.swap_recorded || self.finalized {
            return false;
        }
        self.swap_recorded = true;
        self.used += SwapBuffersCommand::SIZE;
        self.commands.push(SwapBuffersCommand.into());
        true
    }

    /// Close the list with `EndOfList`. Further records are refused until [`Self::reset`].
    pub fn finalize(&mut self) {
        if !self.finalized {
            self.finalized = true;
            self.used += EndOfListCommand::SIZE;
            self.commands.push(EndOfListCommand.into());
        }
    }

    /// Recycle the list for a new frame
    pub fn reset(&mut self) {
        self.commands.clear();
        self.used = 0;
        self.swap_recorded = false;
        self.finalized = false;
    }

    /// Bytes consumed so far
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Byte budget
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `EndOfList` has been appended
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Recorded commands in append order
    pub fn commands(&self) -> &[RenderCommand] {
        &self.commands
    }

    /// Number of recorded commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: usize = SetColorCommand::SIZE;

    fn fill_with_small(list: &mut RenderCommandList) {
        while list.used() + SMALL + RESERVED_TAIL <= list.capacity() {
            let added = list
                .get_render_command(SetColorCommand { color: [1.0; 4] })
                .unwrap();
            assert!(added.is_some());
        }
    }

    #[test]
    fn test_footprints_are_aligned() {
        assert_eq!(EndOfListCommand::SIZE, COMMAND_HEADER_SIZE);
        assert_eq!(SwapBuffersCommand::SIZE, COMMAND_HEADER_SIZE);
        assert_eq!(SetColorCommand::SIZE, 24);
        assert_eq!(RESERVED_TAIL, 16);
        assert_eq!(DrawViewCommand::SIZE % 8, 0);
    }

    #[test]
    fn test_full_buffer_drops_larger_command() {
        let mut list = RenderCommandList::new(1024);
        fill_with_small(&mut list);
        assert!(list.used() >= 1024 - RESERVED_TAIL - SMALL);

        let used = list.used();
        let len = list.len();
        let dropped = list
            .get_render_command(DrawViewCommand {
                view: ViewDef::default(),
                depth_pass: false,
                entities: ArenaSpan::default(),
            })
            .unwrap();
        assert!(dropped.is_none());
        assert_eq!(list.used(), used);
        assert_eq!(list.len(), len);
    }

    #[test]
    fn test_tail_always_fits_swap_and_end_of_list() {
        let mut list = RenderCommandList::new(1024);
        fill_with_small(&mut list);

        assert!(list.push_swap_buffers());
        assert!(!list.push_swap_buffers());
        list.finalize();

        assert!(list.used() <= list.capacity());
        assert!(matches!(list.commands().last(), Some(RenderCommand::EndOfList(_))));
        let total: usize = list.commands().iter().map(RenderCommand::footprint).sum();
        assert_eq!(total, list.used());
    }

    #[test]
    fn test_finalized_list_refuses_until_reset() {
        let mut list = RenderCommandList::new(1024);
        list.finalize();
        assert!(list
            .get_render_command(ResetMatrixTransformCommand)
            .unwrap()
            .is_none());

        list.reset();
        assert_eq!(list.used(), 0);
        assert!(list
            .get_render_command(ResetMatrixTransformCommand)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_command_larger_than_buffer_is_an_error() {
        let mut list = RenderCommandList::new(64);
        let result = list.get_render_command(DrawViewCommand {
            view: ViewDef::default(),
            depth_pass: true,
            entities: ArenaSpan::default(),
        });
        assert!(matches!(result, Err(RenderError::CommandTooLarge { .. })));
    }
}
