//! End-to-end tests of the render context on the dummy backend.
//!
//! # Test Categories
//!
//! - **Startup**: system materials and the present hookup
//! - **Frames**: recorded passes and the frames-in-flight bound
//! - **Resize**: viewport and window resizes
//! - **Environment**: the three-stage IBL bake

mod common;

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use common::{PREFILTER, ScriptedCompiler, layouts, system_source, test_config};
use redlilium_rhi::backend::dummy::{RecordedCommand, Submission};
use redlilium_rhi::environment::{PrefilterUniforms, group_count};
use redlilium_rhi::{
    DummyBackend, EnvironmentConfig, Extent2d, GraphicsError, MaterialError, RenderConfig,
    RenderContext,
    TextureDescriptor, TextureFormat, TextureType,
};

fn context_with(backend: DummyBackend, config: RenderConfig) -> (Arc<DummyBackend>, RenderContext) {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = Arc::new(backend);
    let context = RenderContext::new(
        config,
        backend.clone(),
        Arc::new(system_source()),
        Arc::new(ScriptedCompiler::with_system_shaders()),
        layouts(),
    )
    .unwrap();
    (backend, context)
}

fn context() -> (Arc<DummyBackend>, RenderContext) {
    context_with(DummyBackend::new(), test_config())
}

fn render_color(context: &RenderContext) -> Arc<redlilium_rhi::Texture> {
    let pipeline = context
        .loader()
        .pipeline(context.render_material())
        .unwrap();
    Arc::clone(pipeline.render_pass().unwrap().color_texture(0).unwrap())
}

fn present_source(context: &RenderContext) -> Option<Arc<redlilium_rhi::Texture>> {
    context
        .present_material()
        .get()
        .unwrap()
        .material()
        .gpu_material()
        .bound_texture(redlilium_rhi::context::PRESENT_SOURCE_SLOT)
}

fn run_frame(context: &mut RenderContext) -> bool {
    let began = context.update().unwrap();
    let render = Arc::clone(context.render_material());
    context.begin_pass(&render);
    context.bind_material(&render);
    context.end_pass(&render);
    context.post_update().unwrap();
    began
}

fn begin_rendering_count(submission: &Submission) -> usize {
    submission
        .commands
        .iter()
        .filter(|command| matches!(command, RecordedCommand::BeginRendering { .. }))
        .count()
}

// ============================================================================
// Startup
// ============================================================================

#[test]
fn test_context_loads_system_materials() {
    let (_, context) = context();
    assert!(context.render_material().is_ready());
    assert!(context.present_material().is_ready());
    assert_eq!(context.loader().material_count(), 6);
}

#[test]
fn test_present_samples_render_color_attachment() {
    let (_, context) = context();
    let source = present_source(&context).expect("present source bound");
    assert!(Arc::ptr_eq(&source, &render_color(&context)));
}

#[test]
fn test_missing_system_material_fails_startup() {
    let source = system_source();
    source.remove(common::PREFILTER);
    let result = RenderContext::new(
        test_config(),
        Arc::new(DummyBackend::new()),
        Arc::new(source),
        Arc::new(ScriptedCompiler::with_system_shaders()),
        layouts(),
    );
    assert!(matches!(
        result,
        Err(MaterialError::Dependency { path, .. }) if path == common::PREFILTER
    ));
}

// ============================================================================
// Frames
// ============================================================================

#[test]
fn test_frame_records_scene_and_present_passes() {
    let (backend, mut context) = context();
    assert!(run_frame(&mut context));

    let submission = backend.submissions().pop().unwrap();
    assert!(submission.waits && submission.signals && submission.fenced);

    let passes: Vec<_> = submission
        .commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BeginRendering {
                surface_image,
                extent,
                ..
            } => Some((*surface_image, *extent)),
            _ => None,
        })
        .collect();
    assert_eq!(passes.len(), 2);
    assert_eq!(passes[0], (None, Extent2d::new(320, 240)));
    assert!(passes[1].0.is_some());

    // The full-screen quad: two triangles.
    assert!(submission.commands.contains(&RecordedCommand::Draw {
        vertex_count: 6,
        instance_count: 1,
    }));
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn test_frames_in_flight_are_bounded(#[case] frames: usize) {
    let (backend, mut context) = context_with(
        DummyBackend::new().with_latency(Duration::from_millis(10)),
        test_config().with_frames_in_flight(frames),
    );
    for _ in 0..(frames * 3 + 2) {
        run_frame(&mut context);
    }
    context.wait_all().unwrap();

    assert!(backend.max_in_flight() <= frames);
    assert!(backend.max_in_flight() >= 1);
    assert_eq!(backend.in_flight(), 0);
}

#[test]
fn test_skipped_frame_drops_recording() {
    let (backend, mut context) = context();
    let before = backend.submissions().len();

    // Every acquire attempt of one begin_frame reports out of date.
    backend.force_acquire_out_of_date_times(4);
    assert!(!run_frame(&mut context));
    assert!(!context.is_frame_open());
    assert_eq!(backend.submissions().len(), before);

    assert!(run_frame(&mut context));
    let submissions = backend.submissions();
    assert_eq!(submissions.len(), before + 1);
    assert_eq!(begin_rendering_count(submissions.last().unwrap()), 2);
}

#[test]
fn test_present_error_is_returned_and_next_frame_runs() {
    let (backend, mut context) = context();
    backend.fail_next_present(GraphicsError::SurfaceLost);

    assert!(context.update().unwrap());
    assert_eq!(context.post_update(), Err(GraphicsError::SurfaceLost));
    assert!(!context.is_frame_open());

    assert!(run_frame(&mut context));
    assert_eq!(begin_rendering_count(&backend.submissions().pop().unwrap()), 2);
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn test_viewport_resize_applies_on_next_update() {
    let (_, mut context) = context();
    let old_color = render_color(&context);

    context.on_resize(Extent2d::new(800, 600));
    assert!(context.is_resize_pending());
    assert!(Arc::ptr_eq(&render_color(&context), &old_color));

    context.update().unwrap();
    assert!(!context.is_resize_pending());
    let new_color = render_color(&context);
    assert!(!Arc::ptr_eq(&new_color, &old_color));
    assert_eq!((new_color.width(), new_color.height()), (800, 600));

    // Present follows the new scene texture.
    assert!(Arc::ptr_eq(&present_source(&context).unwrap(), &new_color));
    context.post_update().unwrap();
}

#[rstest]
#[case::game(false, true)]
#[case::editor(true, false)]
fn test_window_resize_requests_viewport_resize_unless_editor(
    #[case] editor_mode: bool,
    #[case] expect_pending: bool,
) {
    let (backend, mut context) = context_with(
        DummyBackend::new(),
        test_config().with_editor_mode(editor_mode),
    );
    context
        .on_window_resize(Extent2d::new(1024, 768))
        .unwrap();

    assert_eq!(context.is_resize_pending(), expect_pending);
    assert_eq!(context.loader().window_extent(), Extent2d::new(1024, 768));

    run_frame(&mut context);
    assert_eq!(backend.surface_extent(), Extent2d::new(1024, 768));
    let scene = render_color(&context);
    let expected = if editor_mode { 320 } else { 1024 };
    assert_eq!(scene.width(), expected);
}

#[test]
fn test_zero_window_resize_is_clamped() {
    let (backend, mut context) = context();
    context.on_window_resize(Extent2d::new(0, 0)).unwrap();
    run_frame(&mut context);
    assert_eq!(backend.surface_extent(), Extent2d::new(1, 1));
}

// ============================================================================
// Environment
// ============================================================================

#[test]
fn test_environment_bake_runs_three_stages() {
    let config = test_config().with_environment(EnvironmentConfig {
        cubemap_size: 64,
        irradiance_size: 16,
        prefilter_size: 32,
    });
    let (backend, context) = context_with(DummyBackend::new(), config);
    let equirect = context
        .create_texture(
            TextureDescriptor::new_2d(128, 64, TextureFormat::Rgba16Float).with_name("sky.hdr"),
            None,
        )
        .unwrap();
    let before = backend.submission_count();

    let maps = context.load_environment_map(equirect).unwrap();

    assert_eq!(maps.cubemap.texture_type(), TextureType::Cubemap);
    assert_eq!(maps.cubemap.width(), 64);
    assert_eq!(maps.irradiance.width(), 16);
    assert_eq!(maps.prefilter.mip_levels(), 6);

    // One immediate submission per stage and prefilter mip.
    assert_eq!(backend.submission_count(), before + 2 + 6);
    assert_eq!(backend.texture_writes(&maps.cubemap), 1);
    assert_eq!(backend.texture_writes(&maps.irradiance), 1);
    assert_eq!(backend.texture_writes(&maps.prefilter), 6);

    let dispatches: Vec<_> = backend.submissions()[before..]
        .iter()
        .flat_map(|s| s.commands.iter())
        .filter_map(|command| match command {
            RecordedCommand::Dispatch { x, y, z } => Some((*x, *y, *z)),
            _ => None,
        })
        .collect();
    assert_eq!(dispatches[0], (group_count(64, 0), group_count(64, 0), 6));
    assert_eq!(dispatches[0], (2, 2, 6));
    assert_eq!(dispatches[1], (1, 1, 6));
    assert_eq!(dispatches.len(), 8);
    for dispatch in &dispatches[2..] {
        assert_eq!(*dispatch, (1, 1, 6));
    }
}

#[test]
fn test_prefilter_writes_roughness_per_mip() {
    let config = test_config().with_environment(EnvironmentConfig {
        cubemap_size: 64,
        irradiance_size: 16,
        prefilter_size: 32,
    });
    let (backend, context) = context_with(DummyBackend::new(), config);
    let equirect = context
        .create_texture(TextureDescriptor::new_2d(128, 64, TextureFormat::Rgba16Float), None)
        .unwrap();

    let maps = context.load_environment_map(equirect).unwrap();
    let mips = maps.prefilter.mip_levels();
    assert_eq!(mips, 6);

    let prefilter = context.loader().get(PREFILTER).unwrap().get().unwrap();
    let buffer = prefilter.material().buffer(2).unwrap();
    let writes = backend.buffer_writes(buffer);
    assert!(writes.len() >= mips as usize);

    let roughness: Vec<f32> = writes[writes.len() - mips as usize..]
        .iter()
        .map(|(offset, bytes)| {
            assert_eq!(*offset, 0);
            bytemuck::pod_read_unaligned::<PrefilterUniforms>(bytes).roughness
        })
        .collect();
    assert_eq!(roughness, [0.0, 0.2, 0.4, 0.6, 0.8, 1.0]);
}
