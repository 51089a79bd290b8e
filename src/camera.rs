//! The free-look camera whose position drives the tessellation levels.
//!
//! The camera model itself is plain data ([`TerrainCamera`]) updated from a frame's worth of
//! pointer input ([`CameraInput`]). [`camera_input`] gathers that input from bevy and mirrors
//! the result onto the camera entity's [`Transform`].

use bevy::{
    input::mouse::{AccumulatedMouseMotion, AccumulatedMouseScroll, MouseScrollUnit},
    prelude::*,
};

/// Degrees of yaw/pitch per pixel of pointer movement.
pub const LOOK_SENSITIVITY: f32 = 0.05;
/// World units travelled along the view direction per scroll line.
pub const ZOOM_SPEED: f32 = 3.0;
/// Pitch is kept away from the poles, where the look-at basis would flip.
pub const PITCH_LIMIT: f32 = 89.0;

const PIXELS_PER_LINE: f32 = 16.0;

/// Whether an overlay currently claims the pointer. Camera input is ignored while it does.
#[derive(Resource, Clone, Copy, Debug, Default, PartialEq, Eq, Deref, DerefMut)]
pub struct UiFocus(pub bool);

/// The perspective parameters of the camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraLens {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl CameraLens {
    pub fn from_viewport(width: f32, height: f32) -> Self {
        Self {
            fov_y: 45.0_f32.to_radians(),
            aspect_ratio: width / height,
            near: 0.1,
            far: 100000.0,
        }
    }

    pub fn clip_from_view(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect_ratio, self.near, self.far)
    }

    /// The equivalent bevy projection. Bevy builds its own (reversed depth) matrix from it.
    pub fn projection(&self) -> Projection {
        Projection::Perspective(PerspectiveProjection {
            fov: self.fov_y,
            aspect_ratio: self.aspect_ratio,
            near: self.near,
            far: self.far,
        })
    }
}

/// The pointer input of a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CameraInput {
    /// Pointer movement in pixels, with `y` pointing up.
    pub pointer_delta: Vec2,
    /// Scroll distance in lines, positive away from the user.
    pub scroll: f32,
    pub primary: bool,
    pub secondary: bool,
    pub ui_focus: bool,
}

#[derive(Component, Clone, Debug)]
#[require(Camera3d)]
pub struct TerrainCamera {
    position: Vec3,
    forward: Vec3,
    /// Radians.
    pitch: f32,
    /// Radians.
    yaw: f32,
    view: Mat4,
    lens: CameraLens,
    projection: Mat4,
}

impl TerrainCamera {
    /// Creates a camera at `position` looking down the negative z axis.
    pub fn new(position: Vec3, lens: CameraLens) -> Self {
        let mut camera = Self {
            position,
            forward: Vec3::NEG_Z,
            pitch: 0.0,
            yaw: 90.0_f32.to_radians(),
            view: Mat4::IDENTITY,
            lens,
            projection: lens.clip_from_view(),
        };

        camera.update_view();
        camera
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn lens(&self) -> &CameraLens {
        &self.lens
    }

    pub fn view_from_world(&self) -> Mat4 {
        self.view
    }

    pub fn clip_from_view(&self) -> Mat4 {
        self.projection
    }

    pub fn clip_from_world(&self) -> Mat4 {
        self.projection * self.view
    }

    /// The camera position recovered from the view matrix.
    pub fn eye(&self) -> Vec3 {
        self.view.inverse().transform_point3(Vec3::ZERO)
    }

    pub fn transform(&self) -> Transform {
        Transform::from_translation(self.position).looking_to(self.forward, Vec3::Y)
    }

    /// Applies one frame of input. Returns whether the camera changed.
    pub fn apply(&mut self, input: &CameraInput) -> bool {
        if input.ui_focus {
            return false;
        }

        let mut changed = false;
        let delta = input.pointer_delta;

        if input.primary {
            if delta != Vec2::ZERO {
                self.look(delta);
                changed = true;
            }
        } else if input.secondary && delta.y != 0.0 {
            self.position.y -= delta.y;
            changed = true;
        }

        if input.scroll != 0.0 {
            self.position -= self.forward * input.scroll * ZOOM_SPEED;
            changed = true;
        }

        if changed {
            self.update_view();
        }

        changed
    }

    fn look(&mut self, delta: Vec2) {
        let limit = PITCH_LIMIT.to_radians();

        self.yaw += (LOOK_SENSITIVITY * delta.x).to_radians();
        self.pitch = (self.pitch + (LOOK_SENSITIVITY * delta.y).to_radians()).clamp(-limit, limit);

        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();

        self.forward = Vec3::new(cos_yaw * cos_pitch, sin_pitch, -sin_yaw * cos_pitch).normalize();
    }

    fn update_view(&mut self) {
        self.view = Mat4::look_at_rh(self.position, self.position + self.forward, Vec3::Y);
    }
}

/// Feeds the pointer input of this frame into every [`TerrainCamera`].
pub fn camera_input(
    mouse_buttons: Res<ButtonInput<MouseButton>>,
    mouse_motion: Res<AccumulatedMouseMotion>,
    mouse_scroll: Res<AccumulatedMouseScroll>,
    ui_focus: Res<UiFocus>,
    mut cameras: Query<(&mut TerrainCamera, &mut Transform)>,
) {
    let scroll = match mouse_scroll.unit {
        MouseScrollUnit::Line => mouse_scroll.delta.y,
        MouseScrollUnit::Pixel => mouse_scroll.delta.y / PIXELS_PER_LINE,
    };

    let input = CameraInput {
        // Screen space y grows downwards.
        pointer_delta: mouse_motion.delta * Vec2::new(1.0, -1.0),
        scroll,
        primary: mouse_buttons.pressed(MouseButton::Left),
        secondary: mouse_buttons.pressed(MouseButton::Right),
        ui_focus: ui_focus.0,
    };

    for (mut camera, mut transform) in &mut cameras {
        if camera.apply(&input) {
            *transform = camera.transform();
        }
    }
}

/// Gives newly spawned cameras the transform and projection of their model.
pub fn init_terrain_camera(
    mut cameras: Query<(&TerrainCamera, &mut Transform, &mut Projection), Added<TerrainCamera>>,
) {
    for (camera, mut transform, mut projection) in &mut cameras {
        *transform = camera.transform();
        *projection = camera.lens().projection();
    }
}
