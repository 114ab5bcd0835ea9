//! Integration tests for material loading on the dummy backend.
//!
//! # Test Categories
//!
//! - **Single-flight**: one load and one compile per path
//! - **Caches**: shader cache by source path, pipeline cache by shader
//! - **Dependencies**: shared attachments, inline loads, cycles
//! - **Resize**: cohort rebuilds and texture hand-over
//! - **Failures**: parse, source, compile and layout errors

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::rstest;

use common::{
    Harness, RENDER, SKYBOX, ScriptedCompiler, compute_material, dependent_material,
    graphics_material, system_source,
};
use redlilium_rhi::shader::{ReflectedBuffer, ShaderStageFlags};
use redlilium_rhi::{
    CompiledShader, Extent2d, MaterialError, MemorySource, ResourceStatus, ShaderReflection,
    ShaderStage, SystemMaterials,
};

fn render_only() -> Harness {
    Harness::new(
        MemorySource::new().with(RENDER, graphics_material("Render", "shaders/render.glsl", true)),
        ScriptedCompiler::with_system_shaders(),
    )
}

// ============================================================================
// Single-flight
// ============================================================================

#[test]
fn test_concurrent_loads_share_one_resource() {
    let harness = render_only();
    harness.compiler.set_delay(Duration::from_millis(20));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let loader = harness.loader.clone();
            thread::spawn(move || loader.load(RENDER))
        })
        .collect();
    let resources: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for resource in &resources {
        assert!(Arc::ptr_eq(resource, &resources[0]));
    }
    assert_eq!(resources[0].wait(), ResourceStatus::Ready);
    assert_eq!(harness.compiler.compile_count("shaders/render.glsl"), 1);
    assert_eq!(harness.loader.material_count(), 1);
    assert_eq!(harness.loader.pipeline_count(), 1);
}

#[test]
fn test_load_after_ready_returns_same_value() {
    let harness = render_only();
    let first = harness.loader.load(RENDER);
    assert_eq!(first.wait(), ResourceStatus::Ready);

    let second = harness.loader.load(RENDER);
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first.get().unwrap(), &second.get().unwrap()));
    assert_eq!(harness.compiler.total_compiles(), 1);
}

#[test]
fn test_get_before_load_is_none() {
    let harness = render_only();
    assert!(harness.loader.get(RENDER).is_none());
    let resource = harness.loader.load(RENDER);
    assert!(Arc::ptr_eq(&harness.loader.get(RENDER).unwrap(), &resource));
}

// ============================================================================
// Shader and pipeline caches
// ============================================================================

#[test]
fn test_materials_sharing_a_shader_share_compile_and_pipeline() {
    let source = MemorySource::new()
        .with("a.material", graphics_material("A", "shaders/render.glsl", true))
        .with("b.material", graphics_material("B", "shaders/render.glsl", true));
    let harness = Harness::new(source, ScriptedCompiler::with_system_shaders());

    let a = harness.loader.load("a.material");
    let b = harness.loader.load("b.material");
    assert_eq!(a.wait(), ResourceStatus::Ready);
    assert_eq!(b.wait(), ResourceStatus::Ready);

    assert_eq!(harness.compiler.compile_count("shaders/render.glsl"), 1);
    assert_eq!(a.get().unwrap().shader().id(), b.get().unwrap().shader().id());
    assert_eq!(harness.loader.pipeline_count(), 1);
    assert!(Arc::ptr_eq(
        &harness.loader.pipeline(&a).unwrap(),
        &harness.loader.pipeline(&b).unwrap()
    ));

    // Each material still owns its own binding table.
    assert!(!Arc::ptr_eq(
        a.get().unwrap().material().gpu_material(),
        b.get().unwrap().material().gpu_material()
    ));
}

#[test]
fn test_distinct_shaders_get_distinct_pipelines() {
    let source = system_source();
    let harness = Harness::new(source, ScriptedCompiler::with_system_shaders());
    let render = harness.loader.load(RENDER);
    let skybox = harness.loader.load(SKYBOX);
    assert_eq!(skybox.wait(), ResourceStatus::Ready);
    assert_eq!(render.wait(), ResourceStatus::Ready);

    let render_pipeline = harness.loader.pipeline(&render).unwrap();
    let skybox_pipeline = harness.loader.pipeline(&skybox).unwrap();
    assert!(!Arc::ptr_eq(&render_pipeline, &skybox_pipeline));
    assert!(Arc::ptr_eq(
        &harness
            .loader
            .pipeline_for_shader(render.get().unwrap().shader().id())
            .unwrap(),
        &render_pipeline
    ));
}

#[test]
fn test_cached_shader_is_available_by_path() {
    let harness = render_only();
    assert!(harness.loader.shader("shaders/render.glsl").is_none());
    assert_eq!(harness.loader.load(RENDER).wait(), ResourceStatus::Ready);
    let shader = harness.loader.shader("shaders/render.glsl").unwrap();
    assert_eq!(shader.reflection().vertex_input.stride(), 32);
}

// ============================================================================
// Compute materials
// ============================================================================

#[test]
fn test_compute_material_gets_compute_pipeline() {
    let source =
        MemorySource::new().with("bake.material", compute_material("Bake", "shaders/bake.comp"));
    let compiler = ScriptedCompiler::new();
    compiler.insert("shaders/bake.comp", common::bake_shader(false));
    let harness = Harness::new(source, compiler);

    let bake = harness.loader.load("bake.material");
    assert_eq!(bake.wait(), ResourceStatus::Ready);
    let pipeline = harness.loader.pipeline(&bake).unwrap();
    assert!(pipeline.is_compute());
    assert!(pipeline.render_pass().is_none());
    assert!(pipeline.compute_pass().is_some());
    assert!(bake.get().unwrap().definition().compute);
}

// ============================================================================
// Dependencies
// ============================================================================

#[test]
fn test_dependency_is_loaded_inline_and_shares_textures() {
    let harness = Harness::new(system_source(), ScriptedCompiler::with_system_shaders());

    // Only the dependent material is requested.
    let skybox = harness.loader.load(SKYBOX);
    assert_eq!(skybox.wait(), ResourceStatus::Ready);

    let render = harness.loader.get(RENDER).expect("dependency was loaded");
    assert_eq!(render.status(), ResourceStatus::Ready);

    let render_pass = harness.loader.pipeline(&render).unwrap().render_pass().unwrap().clone();
    let skybox_pass = harness.loader.pipeline(&skybox).unwrap().render_pass().unwrap().clone();
    assert!(Arc::ptr_eq(
        render_pass.color_texture(0).unwrap(),
        skybox_pass.color_texture(0).unwrap()
    ));
    assert!(Arc::ptr_eq(
        render_pass.depth_texture().unwrap(),
        skybox_pass.depth_texture().unwrap()
    ));
}

#[test]
fn test_dependency_on_missing_attachment_fails() {
    let source = MemorySource::new()
        .with(RENDER, graphics_material("Render", "shaders/render.glsl", true))
        .with(
            "bad.material",
            r#"{ "name": "Bad", "shader": "shaders/skybox.glsl", "version": 1,
                 "attachments": [ { "loadOperation": "LOAD", "storeOperation": "STORE",
                   "dependency": { "path": "materials/render.material", "index": 3 } } ] }"#,
        );
    let harness = Harness::new(source, ScriptedCompiler::with_system_shaders());

    let bad = harness.loader.load("bad.material");
    assert_eq!(bad.wait(), ResourceStatus::Failed);
    assert!(matches!(
        bad.error().as_deref(),
        Some(MaterialError::Dependency { reason, .. }) if reason.contains("color attachment 3")
    ));
    assert_eq!(harness.loader.get(RENDER).unwrap().status(), ResourceStatus::Ready);
}

#[test]
fn test_dependency_on_compute_material_fails() {
    let source = MemorySource::new()
        .with("bake.material", compute_material("Bake", "shaders/bake.comp"))
        .with(
            "draw.material",
            dependent_material("Draw", "shaders/skybox.glsl", "bake.material"),
        );
    let compiler = ScriptedCompiler::with_system_shaders();
    compiler.insert("shaders/bake.comp", common::bake_shader(false));
    let harness = Harness::new(source, compiler);

    let draw = harness.loader.load("draw.material");
    assert_eq!(draw.wait(), ResourceStatus::Failed);
    assert!(matches!(
        draw.error().as_deref(),
        Some(MaterialError::Dependency { reason, .. }) if reason.contains("compute")
    ));
}

#[rstest]
#[case::single_worker(1)]
#[case::many_workers(4)]
fn test_dependency_cycle_fails_instead_of_hanging(#[case] workers: usize) {
    let source = MemorySource::new()
        .with("a.material", dependent_material("A", "shaders/render.glsl", "b.material"))
        .with("b.material", dependent_material("B", "shaders/skybox.glsl", "a.material"));
    let harness = Harness::with_backend(
        redlilium_rhi::DummyBackend::new(),
        source,
        ScriptedCompiler::with_system_shaders(),
        workers,
    );

    let a = harness.loader.load("a.material");
    let b = harness.loader.load("b.material");
    assert_eq!(
        a.wait_timeout(Duration::from_secs(10)),
        ResourceStatus::Failed
    );
    assert_eq!(
        b.wait_timeout(Duration::from_secs(10)),
        ResourceStatus::Failed
    );
    assert!(matches!(
        a.error().as_deref(),
        Some(MaterialError::Dependency { .. })
    ));
}

#[test]
fn test_self_dependency_fails() {
    let source = MemorySource::new().with(
        "self.material",
        dependent_material("Self", "shaders/render.glsl", "self.material"),
    );
    let harness = Harness::new(source, ScriptedCompiler::with_system_shaders());

    let material = harness.loader.load("self.material");
    assert_eq!(
        material.wait_timeout(Duration::from_secs(10)),
        ResourceStatus::Failed
    );
    assert!(matches!(
        material.error().as_deref(),
        Some(MaterialError::Dependency { reason, .. }) if reason.contains("cycle")
    ));
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn test_resize_rebuilds_cohort_with_shared_textures() {
    let harness = Harness::new(system_source(), ScriptedCompiler::with_system_shaders());
    let skybox = harness.loader.load(SKYBOX);
    assert_eq!(skybox.wait(), ResourceStatus::Ready);
    let render = harness.loader.get(RENDER).unwrap();
    let present = harness.loader.load(common::PRESENT);
    assert_eq!(present.wait(), ResourceStatus::Ready);

    let old_render_pipeline = harness.loader.pipeline(&render).unwrap();
    let old_present_pipeline = harness.loader.pipeline(&present).unwrap();
    let old_color = Arc::clone(old_render_pipeline.render_pass().unwrap().color_texture(0).unwrap());

    let extent = Extent2d::new(800, 600);
    harness.loader.resize_pipelines(extent, true);

    assert_eq!(harness.loader.viewport_extent(), extent);
    let render_pipeline = harness.loader.pipeline(&render).unwrap();
    let skybox_pipeline = harness.loader.pipeline(&skybox).unwrap();
    assert!(!Arc::ptr_eq(&render_pipeline, &old_render_pipeline));

    let render_pass = render_pipeline.render_pass().unwrap();
    let skybox_pass = skybox_pipeline.render_pass().unwrap();
    assert_eq!(render_pass.extent(), extent);
    assert_eq!(skybox_pass.extent(), extent);

    let new_color = render_pass.color_texture(0).unwrap();
    assert!(!Arc::ptr_eq(new_color, &old_color));
    assert!(Arc::ptr_eq(new_color, skybox_pass.color_texture(0).unwrap()));
    assert_eq!(new_color.width(), 800);

    // On-screen materials are a different cohort.
    assert!(Arc::ptr_eq(
        &harness.loader.pipeline(&present).unwrap(),
        &old_present_pipeline
    ));
    assert_eq!(harness.compiler.compile_count("shaders/render.glsl"), 1);
}

#[test]
fn test_resize_shares_one_pipeline_per_shader() {
    let source = MemorySource::new()
        .with("a.material", graphics_material("A", "shaders/render.glsl", true))
        .with("b.material", graphics_material("B", "shaders/render.glsl", true));
    let harness = Harness::new(source, ScriptedCompiler::with_system_shaders());
    let a = harness.loader.load("a.material");
    let b = harness.loader.load("b.material");
    assert_eq!(a.wait(), ResourceStatus::Ready);
    assert_eq!(b.wait(), ResourceStatus::Ready);
    let old = harness.loader.pipeline(&a).unwrap();

    let extent = Extent2d::new(512, 256);
    harness.loader.resize_pipelines(extent, true);

    let pipeline_a = harness.loader.pipeline(&a).unwrap();
    let pipeline_b = harness.loader.pipeline(&b).unwrap();
    assert!(Arc::ptr_eq(&pipeline_a, &pipeline_b));
    assert!(!Arc::ptr_eq(&pipeline_a, &old));
    assert_eq!(pipeline_a.render_pass().unwrap().extent(), extent);
    assert_eq!(harness.loader.pipeline_count(), 1);
    assert_eq!(harness.compiler.compile_count("shaders/render.glsl"), 1);

    // Both rebuilt materials bind against the shared pipeline's shader.
    let (loaded_a, loaded_b) = (a.get().unwrap(), b.get().unwrap());
    assert_eq!(loaded_a.shader().id(), pipeline_a.shader().id());
    assert_eq!(loaded_b.shader().id(), pipeline_a.shader().id());
}

#[test]
fn test_window_resize_rebuilds_on_screen_materials_only() {
    let harness = Harness::new(system_source(), ScriptedCompiler::with_system_shaders());
    let render = harness.loader.load(RENDER);
    let present = harness.loader.load(common::PRESENT);
    assert_eq!(render.wait(), ResourceStatus::Ready);
    assert_eq!(present.wait(), ResourceStatus::Ready);
    let old_render = harness.loader.pipeline(&render).unwrap();
    let old_present = harness.loader.pipeline(&present).unwrap();

    harness.loader.resize_pipelines(Extent2d::new(640, 480), false);

    assert_eq!(harness.loader.window_extent(), Extent2d::new(640, 480));
    assert!(Arc::ptr_eq(&harness.loader.pipeline(&render).unwrap(), &old_render));
    assert!(!Arc::ptr_eq(&harness.loader.pipeline(&present).unwrap(), &old_present));
}

#[test]
fn test_resize_clamps_zero_extent() {
    let harness = render_only();
    let render = harness.loader.load(RENDER);
    assert_eq!(render.wait(), ResourceStatus::Ready);

    harness.loader.resize_pipelines(Extent2d::new(0, 0), true);

    let pass_extent = harness
        .loader
        .pipeline(&render)
        .unwrap()
        .render_pass()
        .unwrap()
        .extent();
    assert_eq!(pass_extent, Extent2d::new(1, 1));
}

#[test]
fn test_rebuilt_material_keeps_texture_bindings() {
    let harness = Harness::new(system_source(), ScriptedCompiler::with_system_shaders());
    let render = harness.loader.load(RENDER);
    assert_eq!(render.wait(), ResourceStatus::Ready);

    let albedo = harness
        .render
        .run_wait(|device| {
            device.create_texture(
                &redlilium_rhi::TextureDescriptor::new_2d(4, 4, redlilium_rhi::TextureFormat::Rgba8Unorm),
                None,
                None,
            )
        })
        .unwrap();
    let loaded = render.get().unwrap();
    loaded.material().set_texture(1, &albedo, None);

    harness.loader.resize_pipelines(Extent2d::new(100, 100), true);

    let rebuilt = render.get().unwrap();
    assert!(!Arc::ptr_eq(&loaded, &rebuilt));
    let bound = rebuilt.material().gpu_material().bound_texture(1).unwrap();
    assert!(Arc::ptr_eq(&bound, &albedo));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_missing_file_fails_with_source_error() {
    let harness = render_only();
    let missing = harness.loader.load("nope.material");
    assert_eq!(missing.wait(), ResourceStatus::Failed);
    assert!(matches!(
        missing.error().as_deref(),
        Some(MaterialError::Source { .. })
    ));
    assert!(missing.get().is_none());
}

#[rstest]
#[case::not_json("not json")]
#[case::missing_shader(r#"{ "name": "X", "version": 1 }"#)]
#[case::empty_name(r#"{ "name": "", "shader": "s.glsl", "version": 1 }"#)]
#[case::unknown_load_op(
    r#"{ "name": "X", "shader": "s.glsl", "version": 1,
         "attachments": [ { "loadOperation": "KEEP", "storeOperation": "STORE" } ] }"#
)]
fn test_malformed_file_fails_with_parse_error(#[case] text: &str) {
    let harness = Harness::new(
        MemorySource::new().with("bad.material", text),
        ScriptedCompiler::new(),
    );
    let bad = harness.loader.load("bad.material");
    assert_eq!(bad.wait(), ResourceStatus::Failed);
    assert!(matches!(
        bad.error().as_deref(),
        Some(MaterialError::Parse { .. })
    ));
    assert_eq!(harness.compiler.total_compiles(), 0);
}

#[test]
fn test_failed_compile_is_retried_by_next_load() {
    let source = MemorySource::new()
        .with("a.material", graphics_material("A", "shaders/render.glsl", true))
        .with("b.material", graphics_material("B", "shaders/render.glsl", true));
    let compiler = ScriptedCompiler::with_system_shaders();
    compiler.fail("shaders/render.glsl");
    let harness = Harness::new(source, compiler);

    let a = harness.loader.load("a.material");
    assert_eq!(a.wait(), ResourceStatus::Failed);
    assert!(matches!(
        a.error().as_deref(),
        Some(MaterialError::Shader { .. })
    ));

    harness.compiler.heal("shaders/render.glsl");
    let b = harness.loader.load("b.material");
    assert_eq!(b.wait(), ResourceStatus::Ready);
    assert_eq!(harness.compiler.compile_count("shaders/render.glsl"), 2);

    // The failed handle stays failed.
    assert_eq!(a.status(), ResourceStatus::Failed);
}

#[test]
fn test_unregistered_uniform_block_fails_load() {
    let compiler = ScriptedCompiler::new();
    compiler.insert(
        "shaders/lights.comp",
        CompiledShader::default().with_stage(
            ShaderStage::Compute,
            vec![0x0723_0203],
            ShaderReflection::default().with_buffer(
                0,
                ReflectedBuffer::uniform("Lights", 128, ShaderStageFlags::COMPUTE),
            ),
        ),
    );
    let harness = Harness::new(
        MemorySource::new().with("lights.material", compute_material("Lights", "shaders/lights.comp")),
        compiler,
    );

    let lights = harness.loader.load("lights.material");
    assert_eq!(lights.wait(), ResourceStatus::Failed);
    assert!(matches!(
        lights.error().as_deref(),
        Some(MaterialError::Layout { buffer, .. }) if buffer == "Lights"
    ));
}

#[test]
fn test_conflicting_reflection_fails_every_waiter() {
    let compiler = ScriptedCompiler::new();
    let conflicting = CompiledShader::default()
        .with_stage(
            ShaderStage::Vertex,
            vec![0x0723_0203],
            ShaderReflection::default()
                .with_buffer(0, ReflectedBuffer::uniform("Camera", 64, ShaderStageFlags::VERTEX)),
        )
        .with_stage(
            ShaderStage::Fragment,
            vec![0x0723_0203],
            ShaderReflection::default()
                .with_buffer(0, ReflectedBuffer::uniform("Lights", 64, ShaderStageFlags::FRAGMENT))
                .with_output_count(1),
        );
    compiler.insert("shaders/conflict.glsl", conflicting);
    let source = MemorySource::new()
        .with("a.material", graphics_material("A", "shaders/conflict.glsl", true))
        .with("b.material", graphics_material("B", "shaders/conflict.glsl", true))
        .with("c.material", graphics_material("C", "shaders/conflict.glsl", true));
    let harness = Harness::new(source, compiler);

    let a = harness.loader.load("a.material");
    let b = harness.loader.load("b.material");
    let timeout = Duration::from_secs(5);
    assert_eq!(a.wait_timeout(timeout), ResourceStatus::Failed);
    assert_eq!(b.wait_timeout(timeout), ResourceStatus::Failed);
    assert!(matches!(
        a.error().as_deref(),
        Some(MaterialError::Aborted { reason, .. }) if reason.contains("Lights")
    ));
    assert!(harness.loader.shader("shaders/conflict.glsl").is_none());

    // The failed compile was evicted, so a fixed shader loads.
    harness
        .compiler
        .insert("shaders/conflict.glsl", common::scene_shader());
    let c = harness.loader.load("c.material");
    assert_eq!(c.wait_timeout(timeout), ResourceStatus::Ready);
}

#[test]
fn test_system_materials_report_first_failure() {
    let source = system_source();
    source.remove(common::PRESENT);
    let harness = Harness::new(source, ScriptedCompiler::with_system_shaders());

    let result = harness.loader.load_system_materials(&SystemMaterials::default());
    assert!(matches!(
        result,
        Err(MaterialError::Dependency { path, .. }) if path == common::PRESENT
    ));
}

#[test]
fn test_system_materials_load() {
    let harness = Harness::new(system_source(), ScriptedCompiler::with_system_shaders());
    harness
        .loader
        .load_system_materials(&SystemMaterials::default())
        .unwrap();
    assert_eq!(harness.loader.material_count(), 6);
    assert_eq!(harness.loader.pipeline_count(), 6);
}
