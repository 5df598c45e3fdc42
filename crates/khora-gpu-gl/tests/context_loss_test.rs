use khora_gpu_core::renderer::api::{
    BufferUsage, ConstantDefinition, ConstantDefinitions, ContextId, DriverCapabilities, DriverObject,
    DrawDescriptor, GpuConstantType, IndexFormat, PixelFormat, PrimitiveType, ProgramParameters,
    ShaderHandle, ShaderStage, ShaderStageObject, StageId, TextureTarget, Variability,
};
use khora_gpu_core::renderer::testing::{DriverCall, RecordingDriver};
use khora_gpu_core::renderer::GraphicsDriver;
use khora_gpu_gl::fbo::SurfaceDesc;
use khora_gpu_gl::{GlBackendSettings, GlRenderSystem};

const MAIN: ContextId = ContextId(1);

fn colour_surface(driver: &mut RecordingDriver) -> SurfaceDesc {
    let texture = driver.create_texture().unwrap();
    driver.bind_texture(TextureTarget::D2, texture);
    driver.tex_storage_2d(TextureTarget::D2, PixelFormat::Rgba8Unorm, 128, 128);
    SurfaceDesc::texture(texture, PixelFormat::Rgba8Unorm, 128, 128)
}

fn restore_texture(driver: &mut RecordingDriver, surface: &SurfaceDesc) {
    let (texture, target, _) = surface.texture_handle().unwrap();
    driver.bind_texture(target, texture);
    driver.tex_storage_2d(target, surface.format, surface.width, surface.height);
}

fn link_count(driver: &RecordingDriver) -> usize {
    driver.count_calls(|c| matches!(c, DriverCall::LinkProgram(_)))
}

#[test]
fn test_lost_context_is_rebuilt_behind_stable_handles() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut driver = RecordingDriver::default();
    driver.register_uniforms(ShaderHandle(10), &[("world", 1)]);
    let mut system =
        GlRenderSystem::new(&mut driver, MAIN, DriverCapabilities::default(), &GlBackendSettings::default()).unwrap();

    let mut constants = ConstantDefinitions::new();
    constants.insert(ConstantDefinition::new("world", GpuConstantType::Float4, 0, Variability::PER_OBJECT));
    let vs = ShaderStageObject::new(StageId(1), ShaderStage::Vertex, ShaderHandle(10), "lit_vs")
        .with_constants(constants.clone())
        .into_handle();
    let fs = ShaderStageObject::new(StageId(2), ShaderStage::Fragment, ShaderHandle(11), "lit_fs").into_handle();
    system.set_vertex_stage(Some(vs));
    system.set_fragment_stage(Some(fs));

    let vertex_bytes: Vec<u8> = (0..=255).collect();
    let vertices = system
        .create_vertex_buffer(&mut driver, BufferUsage::Static, &vertex_bytes)
        .unwrap();
    let index_bytes = [0u8, 0, 1, 0, 2, 0];
    let indices = system
        .create_index_buffer(&mut driver, IndexFormat::Uint16, BufferUsage::Static, &index_bytes)
        .unwrap();

    let surface = colour_surface(&mut driver);
    let target = system
        .create_render_texture(&mut driver, "shadow_map", surface, false, 0)
        .unwrap();
    system.set_render_target(&mut driver, target).unwrap();

    let mut params = ProgramParameters::for_definitions(&constants);
    params.write_floats(0, &[0.5, 0.5, 0.5, 1.0]);
    let draw = DrawDescriptor::new(PrimitiveType::TriangleList, vertices, 0).with_indices(indices, 0, 3);
    system.render(&mut driver, &draw, &params).unwrap();
    assert_eq!(link_count(&driver), 1);

    let old_vertex_handle = system.buffers().get(vertices).unwrap().handle();
    let old_fbo = system.render_targets().fbo(target).unwrap().fbo();

    system.notify_context_lost(MAIN);
    driver.lose_context();
    system
        .write_buffer(&mut driver, vertices, 16, &[0xAB; 4])
        .unwrap();

    restore_texture(&mut driver, &surface);
    system.notify_context_reset(&mut driver, MAIN).unwrap();

    let mut expected = vertex_bytes.clone();
    expected[16..20].copy_from_slice(&[0xAB; 4]);
    let restored = system.buffers().get(vertices).unwrap();
    assert_ne!(restored.handle(), old_vertex_handle);
    assert_eq!(driver.buffer_contents(restored.handle()), Some(expected.as_slice()));
    let restored_indices = system.buffers().get(indices).unwrap().handle();
    assert_eq!(driver.buffer_contents(restored_indices), Some(&index_bytes[..]));

    let fbo = system.render_targets().fbo(target).unwrap().fbo();
    assert_ne!(fbo, old_fbo);
    assert!(driver.is_live(DriverObject::Framebuffer(fbo)));

    system.set_render_target(&mut driver, target).unwrap();
    system.render(&mut driver, &draw, &params).unwrap();
    assert_eq!(link_count(&driver), 2);
    assert!(driver
        .calls()
        .iter()
        .rev()
        .any(|c| matches!(c, DriverCall::DrawElements { count: 3, format: IndexFormat::Uint16, .. })));

    system.shutdown(&mut driver);
    assert_eq!(driver.live_framebuffers(), 0);
    assert_eq!(driver.live_renderbuffers(), 0);
    assert_eq!(driver.live_programs(), 0);
}

#[test]
fn test_uniforms_are_uploaded_again_after_reset() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut driver = RecordingDriver::default();
    driver.register_uniforms(ShaderHandle(10), &[("tint", 1)]);
    let mut system =
        GlRenderSystem::new(&mut driver, MAIN, DriverCapabilities::default(), &GlBackendSettings::default()).unwrap();

    let mut constants = ConstantDefinitions::new();
    constants.insert(ConstantDefinition::new("tint", GpuConstantType::Float4, 0, Variability::GLOBAL));
    let vs = ShaderStageObject::new(StageId(1), ShaderStage::Vertex, ShaderHandle(10), "tint_vs")
        .with_constants(constants.clone())
        .into_handle();
    system.set_vertex_stage(Some(vs));
    let mut params = ProgramParameters::for_definitions(&constants);
    params.write_floats(0, &[1.0, 0.0, 0.0, 1.0]);

    let uploads = system
        .bind_program_parameters(&mut driver, ShaderStage::Vertex, &params, Variability::ALL)
        .unwrap();
    assert_eq!(uploads, 1);
    let uploads = system
        .bind_program_parameters(&mut driver, ShaderStage::Vertex, &params, Variability::ALL)
        .unwrap();
    assert_eq!(uploads, 0);

    system.notify_context_lost(MAIN);
    driver.lose_context();
    system.notify_context_reset(&mut driver, MAIN).unwrap();

    let uploads = system
        .bind_program_parameters(&mut driver, ShaderStage::Vertex, &params, Variability::ALL)
        .unwrap();
    assert_eq!(uploads, 1);
    system.shutdown(&mut driver);
}
