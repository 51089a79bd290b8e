use anyhow::{bail, Context};
use bevy::{
    prelude::*,
    render::{
        settings::{RenderCreation, WgpuSettings, WgpuSettingsPriority},
        RenderPlugin,
    },
    window::WindowResolution,
};
use tessellated_terrain::prelude::*;

const CONFIG_PATH: &str = "assets/terrain.ron";

fn main() -> anyhow::Result<()> {
    let config = TerrainConfig::load_or_default(CONFIG_PATH)
        .with_context(|| format!("failed to read the terrain configuration {CONFIG_PATH}"))?;

    let window = Window {
        title: config.window.title.clone(),
        resolution: WindowResolution::new(config.window.width, config.window.height),
        resizable: false,
        ..default()
    };

    let exit = App::new()
        .add_plugins((
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(window),
                    ..default()
                })
                .set(RenderPlugin {
                    render_creation: RenderCreation::Automatic(WgpuSettings {
                        // Enables every adapter feature. Line polygons for the wireframe view are
                        // optional, the view is disabled on devices without them.
                        priority: WgpuSettingsPriority::Functionality,
                        ..default()
                    }),
                    ..default()
                }),
            TerrainPlugin { config },
        ))
        .run();

    if let AppExit::Error(code) = exit {
        bail!("the terrain viewer failed with exit code {code}");
    }

    Ok(())
}
