//! Input state machine (§6 "Keyboard", §4.8 "Collect events ... and drive
//! camera + input").
//!
//! Key-pressed tracking is bit-packed exactly as the teacher's own
//! (uncopied, `ash`-based) `main.rs::InputState` does it: one bit per
//! `VirtualKeyCode`, packed 64-per-word across three `u64`s. A second,
//! previous-frame copy of the bitset lets edge-triggered bindings (cycle
//! camera, record camera, adjust multipliers) fire once per press rather
//! than once per frame held.

use winit::event::VirtualKeyCode;

fn key_index(key: VirtualKeyCode) -> (usize, usize) {
    let bit = key as usize;
    (bit / 64, bit % 64)
}

#[derive(Default, Clone, Copy)]
struct KeyBits([u64; 3]);

impl KeyBits {
    fn set(&mut self, key: VirtualKeyCode) {
        let (major, minor) = key_index(key);
        self.0[major] |= 1 << minor;
    }

    fn clear(&mut self, key: VirtualKeyCode) {
        let (major, minor) = key_index(key);
        self.0[major] &= !(1 << minor);
    }

    fn is_set(&self, key: VirtualKeyCode) -> bool {
        let (major, minor) = key_index(key);
        self.0[major] & (1 << minor) != 0
    }
}

#[derive(Default)]
pub struct InputState {
    key_pressed: KeyBits,
    prev_key_pressed: KeyBits,

    mouse_pos: Option<(f64, f64)>,
    mouse_delta: Option<(f64, f64)>,
    left_mouse_down: bool,
    wheel_delta: f32,
}

impl InputState {
    pub fn key_pressed(&mut self, key: VirtualKeyCode) {
        self.key_pressed.set(key);
    }

    pub fn key_released(&mut self, key: VirtualKeyCode) {
        self.key_pressed.clear(key);
    }

    pub fn is_key_pressed(&self, key: VirtualKeyCode) -> bool {
        self.key_pressed.is_set(key)
    }

    /// True exactly on the tick `key` transitioned from released to
    /// pressed, since the last call to `begin_frame`.
    pub fn just_pressed(&self, key: VirtualKeyCode) -> bool {
        self.key_pressed.is_set(key) && !self.prev_key_pressed.is_set(key)
    }

    pub fn mouse_moved(&mut self, pos: (f64, f64)) {
        let mouse_pos = self.mouse_pos.unwrap_or(pos);
        let mouse_delta = self.mouse_delta.unwrap_or((0.0, 0.0));

        self.mouse_delta = Some((
            mouse_delta.0 + (pos.0 - mouse_pos.0),
            mouse_delta.1 + (pos.1 - mouse_pos.1),
        ));
        self.mouse_pos = Some(pos);
    }

    pub fn mouse_delta(&mut self) -> (f64, f64) {
        self.mouse_delta.take().unwrap_or((0.0, 0.0))
    }

    pub fn set_left_mouse_down(&mut self, down: bool) {
        self.left_mouse_down = down;
    }

    pub fn left_mouse_down(&self) -> bool {
        self.left_mouse_down
    }

    pub fn scrolled(&mut self, delta: f32) {
        self.wheel_delta += delta;
    }

    pub fn take_wheel_delta(&mut self) -> f32 {
        std::mem::take(&mut self.wheel_delta)
    }

    /// Snapshot the current key bitset as "previous", so the next tick's
    /// `just_pressed` checks are relative to this frame. Call once per
    /// scheduler tick, after all of this tick's window events have been
    /// applied and before the edge-triggered bindings are polled.
    pub fn begin_frame(&mut self) {
        self.prev_key_pressed = self.key_pressed;
    }
}

/// One tick's worth of edge-triggered (non-movement) key bindings, per
/// §6's keyboard table. Movement (arrow keys) and arc-ball drag/wheel are
/// read directly off `InputState` by the camera update instead, since
/// they are held-key/continuous, not edge-triggered.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FrameActions {
    pub cycle_active_camera: bool,
    pub cycle_operated_camera: bool,
    pub toggle_final_lighting: bool,
    pub record_camera: bool,
    pub cycle_recorded_camera: bool,
    pub irradiance_step: i32,
    pub form_factor_voxel_to_voxel_step: i32,
    pub form_factor_cluster_to_voxel_step: i32,
    pub direct_irradiance_step: i32,
}

pub fn poll_frame_actions(input: &InputState) -> FrameActions {
    let step = |down, up| -> i32 {
        match (input.just_pressed(down), input.just_pressed(up)) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        }
    };

    FrameActions {
        cycle_active_camera: input.just_pressed(VirtualKeyCode::S),
        cycle_operated_camera: input.just_pressed(VirtualKeyCode::D),
        toggle_final_lighting: input.just_pressed(VirtualKeyCode::L),
        record_camera: input.just_pressed(VirtualKeyCode::Key9),
        cycle_recorded_camera: input.just_pressed(VirtualKeyCode::Key0),
        irradiance_step: step(VirtualKeyCode::Key1, VirtualKeyCode::Key2),
        form_factor_voxel_to_voxel_step: step(VirtualKeyCode::Key3, VirtualKeyCode::Key4),
        form_factor_cluster_to_voxel_step: step(VirtualKeyCode::Key5, VirtualKeyCode::Key6),
        direct_irradiance_step: step(VirtualKeyCode::Key7, VirtualKeyCode::Key8),
    }
}

/// Arrow-key movement deltas for a first-person camera (§6: "arrows =
/// move camera").
pub fn arrow_key_delta(input: &InputState, speed: f32) -> crate::camera::CameraDelta {
    crate::camera::CameraDelta {
        forward: if input.is_key_pressed(VirtualKeyCode::Up) { speed } else { 0.0 },
        backward: if input.is_key_pressed(VirtualKeyCode::Down) { speed } else { 0.0 },
        left: if input.is_key_pressed(VirtualKeyCode::Left) { speed } else { 0.0 },
        right: if input.is_key_pressed(VirtualKeyCode::Right) { speed } else { 0.0 },
        yaw: 0.0,
        pitch: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn just_pressed_fires_once_per_press() {
        let mut input = InputState::default();
        input.begin_frame();
        assert!(!input.just_pressed(VirtualKeyCode::S));

        input.key_pressed(VirtualKeyCode::S);
        assert!(input.just_pressed(VirtualKeyCode::S));

        input.begin_frame();
        assert!(!input.just_pressed(VirtualKeyCode::S));
    }

    #[test]
    fn released_then_pressed_again_refires() {
        let mut input = InputState::default();
        input.key_pressed(VirtualKeyCode::S);
        input.begin_frame();
        assert!(!input.just_pressed(VirtualKeyCode::S));

        input.key_released(VirtualKeyCode::S);
        input.begin_frame();
        input.key_pressed(VirtualKeyCode::S);
        assert!(input.just_pressed(VirtualKeyCode::S));
    }

    #[test]
    fn mouse_delta_accumulates_then_drains() {
        let mut input = InputState::default();
        input.mouse_moved((0.0, 0.0));
        input.mouse_moved((3.0, -2.0));

        let (dx, dy) = input.mouse_delta();
        assert_eq!((dx, dy), (3.0, -2.0));
        assert_eq!(input.mouse_delta(), (0.0, 0.0));
    }

    #[test]
    fn wheel_delta_accumulates_then_drains() {
        let mut input = InputState::default();
        input.scrolled(1.0);
        input.scrolled(0.5);
        assert_eq!(input.take_wheel_delta(), 1.5);
        assert_eq!(input.take_wheel_delta(), 0.0);
    }

    #[test]
    fn irradiance_step_reflects_key_1_and_2() {
        let mut input = InputState::default();
        input.key_pressed(VirtualKeyCode::Key1);
        input.begin_frame();
        input.key_pressed(VirtualKeyCode::Key1);
        let actions = poll_frame_actions(&input);
        assert_eq!(actions.irradiance_step, 0, "held, not freshly pressed this frame");

        input.key_released(VirtualKeyCode::Key1);
        input.begin_frame();
        input.key_pressed(VirtualKeyCode::Key2);
        let actions = poll_frame_actions(&input);
        assert_eq!(actions.irradiance_step, 1);
    }
}
