//! SMP demo
//!
//! Runs the render pipeline over the headless device for a fixed number of
//! frames: a skeletal player with an attached weapon, a ring of props and a
//! 2D HUD. Halfway through, the render thread is toggled so both dispatch
//! modes show up in the log.
//!
//! Usage: `smp_demo [config.toml|config.ron] [frames]`

use daemon_renderer::config::{Config, ConfigError};
use daemon_renderer::core::ApplicationConfig;
use daemon_renderer::foundation::logging;
use daemon_renderer::foundation::math::{axis_from_angles, Angles, BoneTransform, Bounds, Orientation, Vec3};
use daemon_renderer::render::commands::{GradientType, PicRect, ShaderHandle, ViewDef};
use daemon_renderer::render::device::{HeadlessDevice, ImageFormat, TextureDesc};
use daemon_renderer::render::resources::{ShaderStage, TexturePriority};
use daemon_renderer::render::{PolyVert, RenderError, Renderer};
use daemon_renderer::scene::{
    Animation, AnimationPose, EntityTag, EntityUpdate, LerpTagUpdate, Model, ModelBone, ModelKind, RefEntity,
};

const DEFAULT_CONFIG: &str = "smp_demo/demo.toml";
const DEFAULT_FRAMES: u32 = 120;
const PROP_COUNT: u16 = 24;

#[derive(thiserror::Error, Debug)]
enum DemoError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("renderer: {0}")]
    Render(#[from] RenderError),

    #[error("bad frame count '{0}'")]
    FrameCount(String),
}

struct Scene {
    player: EntityUpdate,
    weapon: EntityUpdate,
    props: Vec<EntityUpdate>,
    hud: ShaderHandle,
}

fn load_config(path: &str) -> Result<ApplicationConfig, DemoError> {
    match ApplicationConfig::load_from_file(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::Io(err)) => {
            log::warn!("Could not read {path} ({err}), using defaults");
            Ok(ApplicationConfig::default())
        }
        Err(err) => Err(err.into()),
    }
}

fn build_scene(renderer: &mut Renderer) -> Result<Scene, DemoError> {
    let bounds = Bounds::new(Vec3::new(-16.0, -16.0, -24.0), Vec3::new(16.0, 16.0, 32.0));
    let bones = vec![
        ModelBone { name: "pelvis".into(), parent: None },
        ModelBone { name: "spine".into(), parent: Some(0) },
        ModelBone { name: "hand_r".into(), parent: Some(1) },
    ];
    let step = |z: f32| BoneTransform {
        trans: Vec3::new(0.0, 0.0, z),
        ..BoneTransform::identity()
    };

    let models = renderer.models_mut();
    let player = models.register_model(Model::skeletal("models/players/human_base/body.iqm", ModelKind::Iqm, bounds, bones));
    let walk = models.register_animation(Animation::new(
        "walk",
        vec![None, Some(0), Some(1)],
        vec![
            vec![step(0.0), step(12.0), step(8.0)],
            vec![step(1.0), step(12.0), step(9.0)],
        ],
        vec![bounds, bounds],
    ));
    let weapon = models.register_model(Model::mesh("models/weapons/rifle/rifle.md3", Bounds::default()));
    let crate_tag = Orientation::new(Vec3::new(0.0, 0.0, 8.0), axis_from_angles(&Angles::new(0.0, 45.0, 0.0)));
    let prop = models.register_model(
        Model::mesh("models/mapobjects/crate.md3", Bounds::new(Vec3::repeat(-8.0), Vec3::repeat(8.0)))
            .with_tag("tag_top", vec![crate_tag]),
    );

    let player_entity = RefEntity {
        active: true,
        model: Some(player),
        animation: Some(AnimationPose {
            animation: walk,
            start_frame: 0,
            end_frame: 1,
            lerp: 0.0,
            clear_origin: false,
        }),
        ..RefEntity::default()
    };
    let weapon_entity = RefEntity {
        active: true,
        model: Some(weapon),
        position_on_tag: EntityTag::OnTag,
        attachment_entity: 1,
        tag: "hand_r".to_string(),
        ..RefEntity::default()
    };
    let props = (0..PROP_COUNT)
        .map(|i| {
            let angle = f32::from(i) * std::f32::consts::TAU / f32::from(PROP_COUNT);
            EntityUpdate {
                id: 100 + i * 3,
                entity: RefEntity {
                    active: true,
                    model: Some(prop),
                    origin: Vec3::new(angle.cos() * 256.0, angle.sin() * 256.0, 0.0),
                    ..RefEntity::default()
                },
            }
        })
        .collect();

    let font = renderer.create_texture(
        &TextureDesc::new_2d("gfx/2d/bigchars", ImageFormat::Rgba8, 256, 256),
        TexturePriority::Persistent,
    )?;
    let hud = renderer.register_shader("gfx/2d/bigchars", vec![ShaderStage { location: 0, texture: font }])?;

    Ok(Scene {
        player: EntityUpdate { id: 1, entity: player_entity },
        weapon: EntityUpdate { id: 2, entity: weapon_entity },
        props,
        hud,
    })
}

fn run_frame(renderer: &mut Renderer, scene: &mut Scene, frame: u32) -> Result<(), DemoError> {
    let t = frame as f32 / 30.0;
    if let Some(pose) = scene.player.entity.animation.as_mut() {
        pose.lerp = t.fract();
    }
    scene.player.entity.origin = Vec3::new(t.cos() * 64.0, t.sin() * 64.0, 0.0);

    let mut updates = vec![scene.player.clone(), scene.weapon.clone()];
    updates.extend(scene.props.iter().cloned());
    renderer.sync_entity_cache_from_cgame(&updates)?;

    renderer.begin_frame()?;
    renderer.render_scene(&ViewDef::default())?;

    let hand = renderer.sync_entity_cache_to_cgame(&[LerpTagUpdate { id: 1, tag: "hand_r".to_string() }])?;
    if frame % 30 == 0 {
        if let Some(answer) = hand.first() {
            log::info!("Frame {frame}: hand at {:?}", answer.tag.origin);
        }
    }

    renderer.set_color([1.0, 1.0, 1.0, 1.0])?;
    renderer.set_clip_region(Some([0.0, 0.0, 320.0, 240.0]));
    renderer.stretch_pic(PicRect::new(300.0, 8.0, 64.0, 16.0, 0.0, 0.0, 0.25, 0.0625), scene.hud)?;
    renderer.set_clip_region(None);
    renderer.rotated_pic(PicRect::new(304.0, 224.0, 32.0, 32.0, 0.0, 0.0, 1.0, 1.0), scene.hud, t * 90.0)?;
    renderer.gradient_pic(
        PicRect::new(0.0, 440.0, 640.0, 40.0, 0.0, 0.0, 1.0, 1.0),
        ShaderHandle::DEFAULT,
        [0, 0, 0, 0],
        GradientType::Vertical,
    )?;
    let fan = [
        PolyVert::new(16.0, 16.0, 0.0, 0.0, [255, 0, 0, 255]),
        PolyVert::new(48.0, 16.0, 1.0, 0.0, [0, 255, 0, 255]),
        PolyVert::new(32.0, 48.0, 0.5, 1.0, [0, 0, 255, 255]),
    ];
    renderer.polys_2d(&fan, ShaderHandle::DEFAULT)?;

    let times = renderer.end_frame()?;
    log::debug!("Frame {frame}: front end {} ms, back end {} ms", times.front_end_msec, times.back_end_msec);
    Ok(())
}

fn run() -> Result<(), DemoError> {
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let frames = match args.next() {
        Some(text) => text.parse().map_err(|_| DemoError::FrameCount(text))?,
        None => DEFAULT_FRAMES,
    };

    let config = load_config(&path)?;
    logging::init(&config.engine.log_level);
    config.validate()?;
    log::info!("SMP demo: {frames} frames, smp {}", config.renderer.smp);

    let mut renderer = Renderer::new(Box::new(HeadlessDevice::default()), config.renderer.clone(), config.window)?;
    renderer.list_fbos()?;
    let mut scene = build_scene(&mut renderer)?;

    for frame in 0..frames {
        if frame == frames / 2 {
            let smp = !renderer.dispatcher().is_threaded();
            log::info!("Switching render thread {}", if smp { "on" } else { "off" });
            renderer.set_smp(smp)?;
        }
        run_frame(&mut renderer, &mut scene, frame)?;
    }

    let stats = *renderer.smp_stats();
    log::info!(
        "{} frames issued, blocked on render {}, blocked on main {}",
        stats.frames_issued,
        stats.blocked_on_render,
        stats.blocked_on_main
    );
    renderer.shutdown()?;
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        log::error!("{err}");
        eprintln!("smp_demo: {err}");
        std::process::exit(1);
    }
}
