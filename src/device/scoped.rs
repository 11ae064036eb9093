//! Scoped state changes.
//!
//! Each helper sets a piece of device state, runs the closure and puts the
//! previous value back before returning, whatever the closure returns.

use super::{BlendState, DepthState, FramebufferHandle, GraphicsDevice, Rect};

/// Getter/setter pair for one piece of device state.
pub struct StateAccessor<T> {
    pub get: fn(&dyn GraphicsDevice) -> T,
    pub set: fn(&mut dyn GraphicsDevice, T),
}

impl<T> Clone for StateAccessor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateAccessor<T> {}

fn get_viewport(device: &dyn GraphicsDevice) -> Rect {
    device.viewport()
}

fn set_viewport(device: &mut dyn GraphicsDevice, value: Rect) {
    device.set_viewport(value);
}

fn get_scissor(device: &dyn GraphicsDevice) -> Option<Rect> {
    device.scissor()
}

fn set_scissor(device: &mut dyn GraphicsDevice, value: Option<Rect>) {
    device.set_scissor(value);
}

fn get_color_writes(device: &dyn GraphicsDevice) -> bool {
    device.color_writes()
}

fn set_color_writes(device: &mut dyn GraphicsDevice, value: bool) {
    device.set_color_writes(value);
}

fn get_blend(device: &dyn GraphicsDevice) -> Option<BlendState> {
    device.blend_state()
}

fn set_blend(device: &mut dyn GraphicsDevice, value: Option<BlendState>) {
    device.set_blend_state(value);
}

fn get_depth(device: &dyn GraphicsDevice) -> DepthState {
    device.depth_state()
}

fn set_depth(device: &mut dyn GraphicsDevice, value: DepthState) {
    device.set_depth_state(value);
}

fn get_target(device: &dyn GraphicsDevice) -> Option<FramebufferHandle> {
    device.render_target()
}

fn set_target(device: &mut dyn GraphicsDevice, value: Option<FramebufferHandle>) {
    device.set_render_target(value);
}

impl StateAccessor<Rect> {
    pub const VIEWPORT: Self = Self {
        get: get_viewport,
        set: set_viewport,
    };
}

impl StateAccessor<Option<Rect>> {
    pub const SCISSOR: Self = Self {
        get: get_scissor,
        set: set_scissor,
    };
}

impl StateAccessor<bool> {
    pub const COLOR_WRITES: Self = Self {
        get: get_color_writes,
        set: set_color_writes,
    };
}

impl StateAccessor<Option<BlendState>> {
    pub const BLEND: Self = Self {
        get: get_blend,
        set: set_blend,
    };
}

impl StateAccessor<DepthState> {
    pub const DEPTH: Self = Self {
        get: get_depth,
        set: set_depth,
    };
}

impl StateAccessor<Option<FramebufferHandle>> {
    pub const RENDER_TARGET: Self = Self {
        get: get_target,
        set: set_target,
    };
}

pub fn with_state<T, R>(
    device: &mut dyn GraphicsDevice,
    accessor: StateAccessor<T>,
    value: T,
    f: impl FnOnce(&mut dyn GraphicsDevice) -> R,
) -> R {
    let previous = (accessor.get)(&*device);
    (accessor.set)(&mut *device, value);
    let result = f(&mut *device);
    (accessor.set)(&mut *device, previous);
    result
}

pub fn with_viewport<R>(
    device: &mut dyn GraphicsDevice,
    viewport: Rect,
    f: impl FnOnce(&mut dyn GraphicsDevice) -> R,
) -> R {
    with_state(device, StateAccessor::VIEWPORT, viewport, f)
}

pub fn with_scissor<R>(
    device: &mut dyn GraphicsDevice,
    scissor: Option<Rect>,
    f: impl FnOnce(&mut dyn GraphicsDevice) -> R,
) -> R {
    with_state(device, StateAccessor::SCISSOR, scissor, f)
}

pub fn with_blend_state<R>(
    device: &mut dyn GraphicsDevice,
    blend: Option<BlendState>,
    f: impl FnOnce(&mut dyn GraphicsDevice) -> R,
) -> R {
    with_state(device, StateAccessor::BLEND, blend, f)
}

pub fn with_depth_state<R>(
    device: &mut dyn GraphicsDevice,
    depth: DepthState,
    f: impl FnOnce(&mut dyn GraphicsDevice) -> R,
) -> R {
    with_state(device, StateAccessor::DEPTH, depth, f)
}

pub fn with_render_target<R>(
    device: &mut dyn GraphicsDevice,
    target: Option<FramebufferHandle>,
    f: impl FnOnce(&mut dyn GraphicsDevice) -> R,
) -> R {
    with_state(device, StateAccessor::RENDER_TARGET, target, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    #[test]
    fn viewport_is_restored_after_early_error() {
        let mut device = HeadlessDevice::new();
        device.set_viewport(Rect::from_size(800, 600));

        let result = with_viewport(
            &mut device,
            Rect::from_size(64, 64),
            |device| -> Result<(), &'static str> {
                if device.viewport() == Rect::from_size(64, 64) {
                    return Err("pass failed");
                }
                Ok(())
            },
        );

        assert!(result.is_err());
        assert_eq!(device.viewport(), Rect::from_size(800, 600));
    }

    #[test]
    fn nested_scopes_unwind_in_order() {
        let mut device = HeadlessDevice::new();
        let outer = DepthState::new(true, true);
        device.set_depth_state(outer);

        with_depth_state(&mut device, DepthState::DISABLED, |device| {
            with_blend_state(device, None, |device| {
                assert_eq!(device.depth_state(), DepthState::DISABLED);
            });
        });

        assert_eq!(device.depth_state(), outer);
    }

    #[test]
    fn scissor_and_colour_writes_come_back() {
        let mut device = HeadlessDevice::new();
        let clip = Rect::new(4, 4, 8, 8);

        with_scissor(&mut device, Some(clip), |device| {
            with_state(device, StateAccessor::COLOR_WRITES, false, |device| {
                assert!(!device.color_writes());
                assert_eq!(device.scissor(), Some(clip));
            });
        });

        assert!(device.color_writes());
        assert_eq!(device.scissor(), None);
    }
}
