use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_rhi::shader::{ReflectedBuffer, ReflectedTexture, ShaderStageFlags};
use redlilium_rhi::{
    BufferDescriptor, CompiledShader, DummyBackend, Extent2d, GraphicsDevice, MaterialDefinition,
    MemoryType, ShaderDescriptor, ShaderReflection, ShaderStage, ShaderType, TextureDescriptor,
    TextureFormat,
};

const MATERIAL: &str = r#"{
    "name": "Skybox",
    "shader": "shaders/skybox.glsl",
    "version": 1,
    "offscreen": true,
    "depthCompareOp": "LESS_OR_EQUAL",
    "cullMode": "NONE",
    "attachments": [
        { "loadOperation": "LOAD", "storeOperation": "STORE",
          "dependency": { "path": "materials/render.material", "index": 0 } }
    ],
    "depthAttachment": { "loadOperation": "CLEAR", "storeOperation": "STORE" }
}"#;

fn device() -> GraphicsDevice {
    GraphicsDevice::new(Arc::new(DummyBackend::new()), 2, Extent2d::new(256, 256)).unwrap()
}

fn textured_shader(textures: u32) -> CompiledShader {
    let mut fragment = ShaderReflection::default()
        .with_buffer(0, ReflectedBuffer::uniform("Camera", 64, ShaderStageFlags::FRAGMENT));
    for slot in 1..=textures {
        fragment = fragment.with_texture(
            slot,
            ReflectedTexture::new(format!("t{slot}"), ShaderStageFlags::FRAGMENT),
        );
    }
    CompiledShader::default()
        .with_stage(ShaderStage::Vertex, vec![0], ShaderReflection::default())
        .with_stage(ShaderStage::Fragment, vec![0], fragment)
}

// ---------------------------------------------------------------------------
// Material files
// ---------------------------------------------------------------------------

fn bench_material_parse(c: &mut Criterion) {
    c.bench_function("material_definition_parse", |b| {
        b.iter(|| {
            let definition =
                MaterialDefinition::parse("materials/skybox.material", black_box(MATERIAL))
                    .unwrap();
            black_box(definition);
        });
    });
}

fn bench_reflection_merge(c: &mut Criterion) {
    c.bench_function("shader_descriptor_from_8_texture_program", |b| {
        b.iter_with_setup(
            || textured_shader(8),
            |compiled| {
                let descriptor = ShaderDescriptor::from_compiled(
                    "bench",
                    "shaders/bench.glsl",
                    ShaderType::Fx,
                    compiled,
                );
                black_box(descriptor);
            },
        );
    });
}

// ---------------------------------------------------------------------------
// Binding tables
// ---------------------------------------------------------------------------

fn bench_material_sync(c: &mut Criterion) {
    let device = device();
    let shader = device
        .create_shader(ShaderDescriptor::from_compiled(
            "bench",
            "shaders/bench.glsl",
            ShaderType::Fx,
            textured_shader(8),
        ))
        .unwrap();
    let material = device.create_gpu_material(&shader).unwrap();
    let camera = device
        .create_buffer(
            &BufferDescriptor::uniform(256).with_memory_type(MemoryType::CpuGpu),
            None,
        )
        .unwrap();
    let textures: Vec<_> = (0..8)
        .map(|_| {
            device
                .create_texture(
                    &TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm),
                    None,
                    None,
                )
                .unwrap()
        })
        .collect();

    c.bench_function("gpu_material_sync_9_writes", |b| {
        b.iter(|| {
            material.set_buffer(&camera, 0, ShaderStageFlags::FRAGMENT, 0);
            for (slot, texture) in (1u32..).zip(&textures) {
                material.set_texture(texture, slot, None);
            }
            black_box(material.sync());
        });
    });

    c.bench_function("gpu_material_sync_clean", |b| {
        b.iter(|| black_box(material.sync()));
    });
}

// ---------------------------------------------------------------------------
// Frame loop
// ---------------------------------------------------------------------------

fn bench_empty_frame(c: &mut Criterion) {
    let mut device = device();
    c.bench_function("dummy_empty_frame", |b| {
        b.iter(|| {
            device.begin_frame().unwrap();
            device.end_frame().unwrap();
            device.present().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_material_parse,
    bench_reflection_merge,
    bench_material_sync,
    bench_empty_frame,
);

criterion_main!(benches);
