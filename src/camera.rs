use glam::{Mat4, Vec3, Vec4};

use crate::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraKind {
    FirstPerson,
    ArcBall,
}

/// A camera snapshot read back from a recorded-camera file (§6), laid
/// down verbatim when `recorded_override` is set.
#[derive(Debug, Clone, Copy)]
pub struct RecordedCameraState {
    pub pos: Vec3,
    pub look_at: Vec3,
    pub up: Vec3,
    pub right: Vec3,
    pub view: Mat4,
    pub proj: Mat4,
}

pub struct Camera {
    pub kind: CameraKind,
    pub pos: Vec3,
    pub front: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub proj: Mat4,

    /// Orbit center and distance, meaningful only when `kind ==
    /// CameraKind::ArcBall`.
    pub arc_ball_center: Vec3,
    pub arc_ball_distance: f32,

    pub recorded_override: Option<RecordedCameraState>,
    pub animating: bool,
    pub animation_elapsed: f32,

    prev_pos: Vec3,
    prev_look_at: Vec3,
    dirty: Signal<()>,
}

impl Camera {
    pub const UP: Vec3 = Vec3::Y;

    pub fn new(kind: CameraKind, aspect_ratio: f32) -> Self {
        let z_near = 0.1;
        let z_far = 50.0;
        let fov = std::f32::consts::PI / 4.0;

        let proj = calc_proj(fov, aspect_ratio, z_near, z_far);
        let pos = Vec3::ZERO;
        let front = Vec3::X;

        Self {
            kind,
            pos,
            front,
            yaw: 0.0,
            pitch: 0.0,
            z_near,
            z_far,
            fov,
            proj,
            arc_ball_center: Vec3::ZERO,
            arc_ball_distance: 5.0,
            recorded_override: None,
            animating: false,
            animation_elapsed: 0.0,
            prev_pos: pos,
            prev_look_at: pos + front,
            dirty: Signal::new(),
        }
    }

    /// Fires whenever `update`'s end-of-tick check finds the position or
    /// look-at target changed since the previous call (§8 property 8).
    pub fn on_dirty(&mut self, callback: impl FnMut(()) + 'static) -> crate::signal::SignalToken<()> {
        self.dirty.connect(callback)
    }

    pub fn look_at(&self) -> Vec3 {
        match self.kind {
            CameraKind::FirstPerson => self.pos + self.front,
            CameraKind::ArcBall => self.arc_ball_center,
        }
    }

    pub fn right(&self) -> Vec3 {
        self.front.cross(Self::UP).normalize()
    }

    pub fn up(&self) -> Vec3 {
        self.right().cross(self.front).normalize()
    }

    pub fn move_by_delta(&mut self, delta: CameraDelta) {
        if self.kind != CameraKind::FirstPerson {
            return;
        }

        let horizontal = self.right();

        self.pos += self.front * delta.forward;
        self.pos -= self.front * delta.backward;
        self.pos += horizontal * delta.right;
        self.pos -= horizontal * delta.left;

        self.yaw = (self.yaw - delta.yaw) % 360.0;
        self.pitch = (self.pitch + delta.pitch).clamp(-89.0, 89.0);

        self.front = Vec3::new(
            f32::cos(self.yaw.to_radians()) * f32::cos(self.pitch.to_radians()),
            f32::sin(self.pitch.to_radians()),
            f32::sin(self.yaw.to_radians()) * f32::cos(self.pitch.to_radians()),
        )
        .normalize();
    }

    /// Arc-ball drag: orbit `pos` around `arc_ball_center` by the given
    /// angle deltas (radians).
    pub fn arc_ball_orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        if self.kind != CameraKind::ArcBall {
            return;
        }

        self.yaw += delta_yaw;
        self.pitch = (self.pitch + delta_pitch).clamp(-89.0f32.to_radians(), 89.0f32.to_radians());

        let offset = Vec3::new(
            self.arc_ball_distance * self.pitch.cos() * self.yaw.cos(),
            self.arc_ball_distance * self.pitch.sin(),
            self.arc_ball_distance * self.pitch.cos() * self.yaw.sin(),
        );

        self.pos = self.arc_ball_center + offset;
        self.front = (self.arc_ball_center - self.pos).normalize();
    }

    /// Arc-ball wheel zoom: `delta > 0` moves the camera closer.
    pub fn arc_ball_zoom(&mut self, delta: f32) {
        if self.kind != CameraKind::ArcBall {
            return;
        }

        self.arc_ball_distance = (self.arc_ball_distance - delta).max(0.1);
        self.arc_ball_orbit(0.0, 0.0);
    }

    pub fn view(&self) -> Mat4 {
        if let Some(recorded) = &self.recorded_override {
            return recorded.view;
        }
        Mat4::look_at_rh(self.pos, self.look_at(), Self::UP)
    }

    pub fn proj(&self) -> Mat4 {
        if let Some(recorded) = &self.recorded_override {
            return recorded.proj;
        }
        self.proj
    }

    pub fn proj_view(&self) -> Mat4 {
        self.proj() * self.view()
    }

    pub fn resize_proj(&mut self, aspect_ratio: f32) {
        self.proj = calc_proj(self.fov, aspect_ratio, self.z_near, self.z_far);
    }

    pub fn advance_animation(&mut self, dt: f32) {
        if self.animating {
            self.animation_elapsed += dt;
        }
    }

    /// End-of-tick bookkeeping: fires the dirty signal iff position or
    /// look-at changed since the last call.
    pub fn update(&mut self) {
        let pos = self.pos;
        let look_at = self.look_at();

        if pos != self.prev_pos || look_at != self.prev_look_at {
            self.dirty.emit(());
        }

        self.prev_pos = pos;
        self.prev_look_at = look_at;
    }

    pub fn frustrum(&self) -> Frustrum {
        let proj_view = self.proj_view();

        let planes = [
            proj_view.row(3) + proj_view.row(0),
            proj_view.row(3) - proj_view.row(0),
            proj_view.row(3) + proj_view.row(1),
            proj_view.row(3) - proj_view.row(1),
            proj_view.row(3) + proj_view.row(2),
            proj_view.row(3) - proj_view.row(2),
        ];

        let planes = planes.map(|plane| {
            let normal = plane.truncate();
            let length = normal.length();
            -plane / length
        });

        Frustrum {
            left: planes[0],
            right: planes[1],
            bottom: planes[2],
            top: planes[3],
            near: planes[4],
            far: planes[5],
        }
    }
}

fn calc_proj(fov: f32, aspect_ratio: f32, z_near: f32, z_far: f32) -> Mat4 {
    Mat4::perspective_rh(fov, aspect_ratio, z_near, z_far)
}

#[derive(Clone, Debug, Default)]
pub struct CameraDelta {
    pub left: f32,
    pub right: f32,
    pub forward: f32,
    pub backward: f32,
    pub yaw: f32,
    pub pitch: f32,
}

pub struct Frustrum {
    pub top: Vec4,
    pub bottom: Vec4,
    pub right: Vec4,
    pub left: Vec4,
    pub far: Vec4,
    pub near: Vec4,
}

impl Frustrum {
    pub fn planes(&self) -> [Vec4; 6] {
        [self.left, self.right, self.bottom, self.top, self.near, self.far]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_fires_on_position_change() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut camera = Camera::new(CameraKind::FirstPerson, 16.0 / 9.0);
        let fired = Rc::new(Cell::new(false));
        let fired_clone = Rc::clone(&fired);
        let _token = camera.on_dirty(move |_| fired_clone.set(true));

        camera.update();
        assert!(!fired.get(), "first update should not be dirty relative to itself");

        camera.pos += Vec3::X;
        camera.update();
        assert!(fired.get());
    }

    #[test]
    fn dirty_does_not_fire_when_unchanged() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut camera = Camera::new(CameraKind::FirstPerson, 16.0 / 9.0);
        camera.update();

        let fired = Rc::new(Cell::new(false));
        let fired_clone = Rc::clone(&fired);
        let _token = camera.on_dirty(move |_| fired_clone.set(true));

        camera.update();
        assert!(!fired.get());
    }

    #[test]
    fn frustum_planes_are_unit_normalized() {
        let camera = Camera::new(CameraKind::FirstPerson, 16.0 / 9.0);
        for plane in camera.frustrum().planes() {
            assert!((plane.truncate().length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn arc_ball_zoom_round_trips() {
        let mut camera = Camera::new(CameraKind::ArcBall, 16.0 / 9.0);
        let original = camera.arc_ball_distance;

        camera.arc_ball_zoom(1.0);
        camera.arc_ball_zoom(-1.0);

        assert!((camera.arc_ball_distance - original).abs() < 1e-5);
    }

    #[test]
    fn recorded_override_replaces_view_and_proj() {
        let mut camera = Camera::new(CameraKind::FirstPerson, 16.0 / 9.0);
        let recorded = RecordedCameraState {
            pos: Vec3::splat(3.0),
            look_at: Vec3::ZERO,
            up: Vec3::Y,
            right: Vec3::X,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
        };
        camera.recorded_override = Some(recorded);

        assert_eq!(camera.view(), Mat4::IDENTITY);
        assert_eq!(camera.proj(), Mat4::IDENTITY);
    }
}
