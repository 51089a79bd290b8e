//! The control panel and keyboard shortcuts that edit the live [`RenderSettings`] and
//! [`LodSettings`].
//!
//! | key | action                                |
//! |-----|---------------------------------------|
//! | W   | toggle the wireframe view             |
//! | L   | toggle the tessellation level shading |
//! | T   | switch between test patch and terrain |

use crate::{
    camera::UiFocus,
    plugin::{TerrainSet, MAX_HEIGHT_SCALE, MIN_HEIGHT_SCALE},
    render::{RenderMode, RenderSettings},
    tessellation::{LodSettings, MAX_TESS_LEVEL},
};
use bevy::prelude::*;

pub const MIN_RANGE_LIMITS: (f32, f32) = (1.0, 500.0);
pub const MAX_RANGE_LIMITS: (f32, f32) = (1.0, 1500.0);

const HEIGHT_SCALE_STEP: f32 = 2.0;
const MIN_RANGE_STEP: f32 = 10.0;
const MAX_RANGE_STEP: f32 = 25.0;

const PANEL_COLOR: Color = Color::srgba(0.05, 0.05, 0.05, 0.75);
const BUTTON_COLOR: Color = Color::srgb(0.25, 0.25, 0.25);
const ACTIVE_COLOR: Color = Color::srgb(0.2, 0.45, 0.8);
const FONT_SIZE: f32 = 14.0;

/// Adds the control panel and the keyboard shortcuts.
pub struct TerrainDebugPlugin;

impl Plugin for TerrainDebugPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<UiFocus>()
            .add_systems(Startup, spawn_control_panel)
            .add_systems(
                Update,
                (
                    (update_ui_focus, toggle_debug, press_panel_buttons),
                    refresh_control_panel,
                )
                    .chain()
                    .in_set(TerrainSet::Controls),
            );
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

pub fn toggle_debug(input: Res<ButtonInput<KeyCode>>, mut settings: ResMut<RenderSettings>) {
    if input.just_pressed(KeyCode::KeyW) {
        settings.wireframe = !settings.wireframe;
        info!("Toggled the wireframe view {}.", on_off(settings.wireframe));
    }
    if input.just_pressed(KeyCode::KeyL) {
        settings.show_lod = !settings.show_lod;
        info!("Toggled the lod view {}.", on_off(settings.show_lod));
    }
    if input.just_pressed(KeyCode::KeyT) {
        settings.mode = settings.mode.toggled();
        info!("Switched to the {} view.", settings.mode.label());
    }
}

/// A value shown in the control panel.
#[derive(Component, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PanelLabel {
    Wireframe,
    ShowLod,
    HeightScale,
    MinTessLevel,
    MaxTessLevel,
    MinRange,
    MaxRange,
    Mode,
}

impl PanelLabel {
    pub fn text(self, settings: &RenderSettings, lod: &LodSettings) -> String {
        match self {
            Self::Wireframe => format!("Wireframe: {}", on_off(settings.wireframe)),
            Self::ShowLod => format!("Debug LOD: {}", on_off(settings.show_lod)),
            Self::HeightScale => format!("Height scale: {:.1}", settings.height_scale),
            Self::MinTessLevel => format!("Min tess level: {}", lod.min_tess_level),
            Self::MaxTessLevel => format!("Max tess level: {}", lod.max_tess_level),
            Self::MinRange => format!("Min range: {:.0}", lod.min_range),
            Self::MaxRange => format!("Max range: {:.0}", lod.max_range),
            Self::Mode => format!("Render mode: {}", settings.mode.label()),
        }
    }
}

/// What pressing a control panel button does.
#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub enum PanelAction {
    ToggleWireframe,
    ToggleShowLod,
    SetMode(RenderMode),
    HeightScale(f32),
    MinTessLevel(i32),
    MaxTessLevel(i32),
    MinRange(f32),
    MaxRange(f32),
}

impl PanelAction {
    /// Applies the action, keeping every value within its range and the level of detail
    /// settings valid.
    pub fn apply(self, settings: &mut RenderSettings, lod: &mut LodSettings) {
        match self {
            Self::ToggleWireframe => settings.wireframe = !settings.wireframe,
            Self::ToggleShowLod => settings.show_lod = !settings.show_lod,
            Self::SetMode(mode) => settings.mode = mode,
            Self::HeightScale(step) => {
                settings.height_scale = (settings.height_scale + step)
                    .max(MIN_HEIGHT_SCALE)
                    .min(MAX_HEIGHT_SCALE);
            }
            Self::MinTessLevel(step) => {
                lod.min_tess_level = lod
                    .min_tess_level
                    .saturating_add_signed(step)
                    .max(1)
                    .min(lod.max_tess_level);
            }
            Self::MaxTessLevel(step) => {
                lod.max_tess_level = lod
                    .max_tess_level
                    .saturating_add_signed(step)
                    .max(lod.min_tess_level)
                    .min(MAX_TESS_LEVEL);
            }
            Self::MinRange(step) => {
                let min_range = (lod.min_range + step)
                    .max(MIN_RANGE_LIMITS.0)
                    .min(MIN_RANGE_LIMITS.1);

                if min_range < lod.max_range {
                    lod.min_range = min_range;
                }
            }
            Self::MaxRange(step) => {
                let max_range = (lod.max_range + step)
                    .max(MAX_RANGE_LIMITS.0)
                    .min(MAX_RANGE_LIMITS.1);

                if max_range > lod.min_range {
                    lod.max_range = max_range;
                }
            }
        }
    }

    /// The value this action edits.
    pub fn label(self) -> PanelLabel {
        match self {
            Self::ToggleWireframe => PanelLabel::Wireframe,
            Self::ToggleShowLod => PanelLabel::ShowLod,
            Self::SetMode(_) => PanelLabel::Mode,
            Self::HeightScale(_) => PanelLabel::HeightScale,
            Self::MinTessLevel(_) => PanelLabel::MinTessLevel,
            Self::MaxTessLevel(_) => PanelLabel::MaxTessLevel,
            Self::MinRange(_) => PanelLabel::MinRange,
            Self::MaxRange(_) => PanelLabel::MaxRange,
        }
    }

    /// Whether a toggle or radio button is currently selected. `None` for steppers.
    pub fn is_active(self, settings: &RenderSettings) -> Option<bool> {
        match self {
            Self::ToggleWireframe => Some(settings.wireframe),
            Self::ToggleShowLod => Some(settings.show_lod),
            Self::SetMode(mode) => Some(settings.mode == mode),
            _ => None,
        }
    }
}

/// Marks every node of the control panel. Hovering any of them takes the pointer away from
/// the camera.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct ControlPanel;

pub fn update_ui_focus(panel: Query<&Interaction, With<ControlPanel>>, mut focus: ResMut<UiFocus>) {
    let focused = panel
        .iter()
        .any(|interaction| *interaction != Interaction::None);

    focus.set_if_neq(UiFocus(focused));
}

pub fn press_panel_buttons(
    buttons: Query<(&Interaction, &PanelAction), Changed<Interaction>>,
    mut settings: ResMut<RenderSettings>,
    mut lod: ResMut<LodSettings>,
) {
    for (interaction, &action) in &buttons {
        if *interaction != Interaction::Pressed {
            continue;
        }

        action.apply(&mut settings, &mut lod);
        info!("{}.", action.label().text(&settings, &lod));
    }
}

pub fn refresh_control_panel(
    settings: Res<RenderSettings>,
    lod: Res<LodSettings>,
    mut labels: Query<(&PanelLabel, &mut Text)>,
    mut buttons: Query<(&PanelAction, &mut BackgroundColor)>,
) {
    if !(settings.is_changed() || lod.is_changed()) {
        return;
    }

    for (label, mut text) in &mut labels {
        text.0 = label.text(&settings, &lod);
    }

    for (action, mut color) in &mut buttons {
        let active = action.is_active(&settings).unwrap_or(false);
        color.set_if_neq(BackgroundColor(if active {
            ACTIVE_COLOR
        } else {
            BUTTON_COLOR
        }));
    }
}

fn text_font() -> TextFont {
    TextFont {
        font_size: FONT_SIZE,
        ..default()
    }
}

fn spawn_button(parent: &mut ChildBuilder, action: PanelAction, caption: &str) {
    parent
        .spawn((
            ControlPanel,
            action,
            Button,
            Node {
                padding: UiRect::axes(Val::Px(8.0), Val::Px(2.0)),
                margin: UiRect::left(Val::Px(4.0)),
                ..default()
            },
            BackgroundColor(BUTTON_COLOR),
        ))
        .with_children(|button| {
            button.spawn((Text::new(caption), text_font()));
        });
}

fn spawn_row(parent: &mut ChildBuilder, label: PanelLabel, buttons: &[(PanelAction, &str)]) {
    parent
        .spawn(Node {
            flex_direction: FlexDirection::Row,
            align_items: AlignItems::Center,
            column_gap: Val::Px(2.0),
            ..default()
        })
        .with_children(|row| {
            row.spawn((
                label,
                Text::default(),
                text_font(),
                Node {
                    width: Val::Px(150.0),
                    ..default()
                },
            ));

            for &(action, caption) in buttons {
                spawn_button(row, action, caption);
            }
        });
}

pub fn spawn_control_panel(mut commands: Commands) {
    commands
        .spawn((
            Name::new("Control Panel"),
            ControlPanel,
            Interaction::default(),
            Node {
                position_type: PositionType::Absolute,
                top: Val::Px(10.0),
                left: Val::Px(10.0),
                flex_direction: FlexDirection::Column,
                row_gap: Val::Px(4.0),
                padding: UiRect::all(Val::Px(8.0)),
                ..default()
            },
            BackgroundColor(PANEL_COLOR),
        ))
        .with_children(|panel| {
            spawn_row(
                panel,
                PanelLabel::Mode,
                &[
                    (PanelAction::SetMode(RenderMode::TestPatch), "Test"),
                    (PanelAction::SetMode(RenderMode::Terrain), "Terrain"),
                ],
            );
            spawn_row(
                panel,
                PanelLabel::Wireframe,
                &[(PanelAction::ToggleWireframe, "Toggle")],
            );
            spawn_row(
                panel,
                PanelLabel::ShowLod,
                &[(PanelAction::ToggleShowLod, "Toggle")],
            );
            spawn_row(
                panel,
                PanelLabel::HeightScale,
                &[
                    (PanelAction::HeightScale(-HEIGHT_SCALE_STEP), "-"),
                    (PanelAction::HeightScale(HEIGHT_SCALE_STEP), "+"),
                ],
            );
            spawn_row(
                panel,
                PanelLabel::MinTessLevel,
                &[
                    (PanelAction::MinTessLevel(-1), "-"),
                    (PanelAction::MinTessLevel(1), "+"),
                ],
            );
            spawn_row(
                panel,
                PanelLabel::MaxTessLevel,
                &[
                    (PanelAction::MaxTessLevel(-1), "-"),
                    (PanelAction::MaxTessLevel(1), "+"),
                ],
            );
            spawn_row(
                panel,
                PanelLabel::MinRange,
                &[
                    (PanelAction::MinRange(-MIN_RANGE_STEP), "-"),
                    (PanelAction::MinRange(MIN_RANGE_STEP), "+"),
                ],
            );
            spawn_row(
                panel,
                PanelLabel::MaxRange,
                &[
                    (PanelAction::MaxRange(-MAX_RANGE_STEP), "-"),
                    (PanelAction::MaxRange(MAX_RANGE_STEP), "+"),
                ],
            );
        });
}
