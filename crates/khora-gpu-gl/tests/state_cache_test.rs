use khora_gpu_core::renderer::api::{
    BlendEquation, BlendFactor, BufferTarget, Capability, CompareFunction, CullFace, DriverObject,
    PolygonMode, Rect, TextureParameter, TextureTarget,
};
use khora_gpu_core::renderer::testing::{DriverCall, RecordingDriver};
use khora_gpu_core::renderer::GraphicsDriver;
use khora_gpu_gl::StateCache;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn apply_frame_state(driver: &mut RecordingDriver, cache: &mut StateCache) {
    cache.set_depth_mask(driver, false);
    cache.set_depth_func(driver, CompareFunction::Greater);
    cache.set_stencil_mask(driver, 0x0F);
    cache.set_clear_colour(driver, [0.1, 0.2, 0.3, 1.0]);
    cache.set_clear_depth(driver, 0.0);
    cache.set_colour_mask(driver, [true, true, true, false]);
    cache.set_cull_face(driver, CullFace::Front);
    cache.set_polygon_mode(driver, PolygonMode::Line);
    cache.set_point_size(driver, 4.0);
    cache.set_viewport(driver, Rect::from_size(1280, 720));
    cache.set_blend_func_separate(
        driver,
        BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha,
        BlendFactor::One,
        BlendFactor::Zero,
    );
    cache.set_blend_equation_separate(driver, BlendEquation::Add, BlendEquation::Max);
    cache.set_enabled(driver, Capability::Blend);
    cache.set_disabled(driver, Capability::DepthTest);
}

#[test]
fn test_reapplying_state_issues_no_driver_calls() {
    init_logger();
    let mut driver = RecordingDriver::default();
    let mut cache = StateCache::new(driver.capabilities().max_texture_units);

    apply_frame_state(&mut driver, &mut cache);
    let first = driver.calls().len();
    assert!(first > 0);

    driver.clear_calls();
    apply_frame_state(&mut driver, &mut cache);
    assert!(driver.calls().is_empty());
    assert!(cache.stats().elided >= first as u64);
}

#[test]
fn test_texture_parameters_are_cached_per_texture() {
    init_logger();
    let mut driver = RecordingDriver::default();
    let mut cache = StateCache::new(16);
    let a = driver.create_texture().unwrap();
    let b = driver.create_texture().unwrap();

    cache.bind_texture(&mut driver, TextureTarget::D2, a);
    cache.set_tex_parameter_i(&mut driver, TextureTarget::D2, TextureParameter::MaxLevel, 0);
    cache.bind_texture(&mut driver, TextureTarget::D2, b);
    cache.set_tex_parameter_i(&mut driver, TextureTarget::D2, TextureParameter::MaxLevel, 0);
    cache.bind_texture(&mut driver, TextureTarget::D2, a);
    cache.set_tex_parameter_i(&mut driver, TextureTarget::D2, TextureParameter::MaxLevel, 0);

    assert_eq!(
        driver.count_calls(|c| matches!(c, DriverCall::TexParameterI(_, TextureParameter::MaxLevel, 0))),
        2
    );
}

#[test]
fn test_force_resynchronises_a_desynced_binding() {
    init_logger();
    let mut driver = RecordingDriver::default();
    let mut cache = StateCache::new(16);
    let buffer = driver.create_buffer().unwrap();

    cache.bind_buffer(&mut driver, BufferTarget::Array, buffer, false);
    cache.bind_buffer(&mut driver, BufferTarget::Array, buffer, false);
    cache.bind_buffer(&mut driver, BufferTarget::Array, buffer, true);
    assert_eq!(
        driver.count_calls(|c| *c == DriverCall::BindBuffer(BufferTarget::Array, buffer)),
        2
    );
}

#[test]
fn test_deleted_names_are_forgotten() {
    init_logger();
    let mut driver = RecordingDriver::default();
    let mut cache = StateCache::new(16);
    let buffer = driver.create_buffer().unwrap();

    cache.bind_buffer(&mut driver, BufferTarget::ElementArray, buffer, false);
    cache.delete_object(&mut driver, DriverObject::Buffer(buffer));
    assert_eq!(cache.bound_buffer(BufferTarget::ElementArray), None);
    assert!(!driver.is_live(DriverObject::Buffer(buffer)));

    driver.clear_calls();
    cache.bind_buffer(&mut driver, BufferTarget::ElementArray, buffer, false);
    assert_eq!(driver.calls().len(), 1);
}
