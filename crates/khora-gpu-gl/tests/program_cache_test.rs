use ahash::AHashSet;
use khora_gpu_core::renderer::api::{
    ConstantDefinition, ConstantDefinitions, DriverCapabilities, DriverFeatures, GpuConstantType, ProgramParameters, ShaderHandle,
    ShaderStage, ShaderStageHandle, ShaderStageObject, StageId, Variability,
};
use khora_gpu_core::renderer::testing::{DriverCall, RecordingDriver};
use khora_gpu_core::renderer::MicrocodeCache;
use khora_gpu_gl::{LinkStrategy, ProgramCache, ProgramKey};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn stage(id: u32, kind: ShaderStage) -> ShaderStageHandle {
    ShaderStageObject::new(StageId(id), kind, ShaderHandle(id), format!("stage{id}")).into_handle()
}

#[test]
fn test_program_identity_survives_slot_changes() {
    init_logger();
    let mut driver = RecordingDriver::default();
    let mut microcode = MicrocodeCache::new();
    let mut cache = ProgramCache::new(LinkStrategy::Monolithic, false);
    let (v1, v2) = (stage(1, ShaderStage::Vertex), stage(2, ShaderStage::Vertex));
    let f = stage(3, ShaderStage::Fragment);

    cache.set_vertex_stage(Some(v1.clone()));
    cache.set_fragment_stage(Some(f.clone()));
    let first = cache.active_program(&mut driver, &mut microcode).unwrap().unwrap().program();

    cache.set_vertex_stage(Some(v2));
    let second = cache.active_program(&mut driver, &mut microcode).unwrap().unwrap().program();
    assert_ne!(first, second);

    cache.set_vertex_stage(Some(v1));
    let again = cache.active_program(&mut driver, &mut microcode).unwrap().unwrap().program();
    assert_eq!(first, again);
    assert_eq!(cache.len(), 2);
    assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::LinkProgram(_))), 2);
}

#[test]
fn test_keys_are_collision_free_and_order_sensitive() {
    let mut keys = AHashSet::new();
    for id in 0..10_000u32 {
        let other = (id * 7_919 + 13) % 10_000;
        let vertex = (id != 0).then_some(StageId(id));
        let fragment = (other != 0).then_some(StageId(other));
        keys.insert(ProgramKey::combine(vertex, fragment));
        keys.insert(ProgramKey::combine(fragment, vertex));
        keys.insert(ProgramKey::combine(vertex, None));
        keys.insert(ProgramKey::combine(None, vertex));
    }
    let mut expected = AHashSet::new();
    for id in 0..10_000u32 {
        let other = (id * 7_919 + 13) % 10_000;
        expected.insert((id, other));
        expected.insert((other, id));
        expected.insert((id, 0));
        expected.insert((0, id));
    }
    assert_eq!(keys.len(), expected.len());
}

#[test]
fn test_keys_round_trip_edge_ids() {
    let ids = [1, 2, u32::MAX - 1, u32::MAX];
    for v in ids {
        for f in ids {
            let key = ProgramKey::combine(Some(StageId(v)), Some(StageId(f)));
            assert_eq!(key.vertex(), Some(StageId(v)));
            assert_eq!(key.fragment(), Some(StageId(f)));
            assert!(key.uses(StageId(v)) && key.uses(StageId(f)));
            assert!(!key.is_none());
        }
        let vertex_only = ProgramKey::combine(Some(StageId(v)), None);
        assert_eq!((vertex_only.vertex(), vertex_only.fragment()), (Some(StageId(v)), None));
        let fragment_only = ProgramKey::combine(None, Some(StageId(v)));
        assert_eq!((fragment_only.vertex(), fragment_only.fragment()), (None, Some(StageId(v))));
        assert_ne!(vertex_only, fragment_only);
    }

    // Id 0 is the empty-slot marker.
    assert!(ProgramKey::combine(Some(StageId(0)), Some(StageId(0))).is_none());
    let max = StageId(u32::MAX);
    assert_eq!(
        ProgramKey::combine(Some(StageId(0)), Some(max)),
        ProgramKey::combine(None, Some(max))
    );
    assert!(!ProgramKey::combine(None, Some(max)).uses(StageId(0)));
    assert_eq!(ProgramKey::combine(Some(max), Some(max)).as_u64(), u64::MAX);
}

#[test]
fn test_microcode_skips_the_second_link() {
    init_logger();
    let mut driver = RecordingDriver::new(DriverCapabilities {
        features: DriverFeatures::default() | DriverFeatures::PROGRAM_BINARY,
        ..Default::default()
    });
    let mut microcode = MicrocodeCache::new();
    let vs = stage(1, ShaderStage::Vertex);
    let fs = stage(2, ShaderStage::Fragment);

    let mut first = ProgramCache::new(LinkStrategy::Monolithic, true);
    first.set_vertex_stage(Some(vs.clone()));
    first.set_fragment_stage(Some(fs.clone()));
    first.active_program(&mut driver, &mut microcode).unwrap();
    assert_eq!(microcode.len(), 1);

    let mut second = ProgramCache::new(LinkStrategy::Monolithic, true);
    second.set_vertex_stage(Some(vs));
    second.set_fragment_stage(Some(fs));
    second.active_program(&mut driver, &mut microcode).unwrap();
    assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::LinkProgram(_))), 1);
    assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::LoadProgramBinary(_))), 1);
}

#[test]
fn test_unchanged_uniforms_are_uploaded_once() {
    init_logger();
    let mut driver = RecordingDriver::default();
    driver.register_uniforms(ShaderHandle(1), &[("world", 1)]);
    let mut microcode = MicrocodeCache::new();
    let mut constants = ConstantDefinitions::new();
    constants.insert(ConstantDefinition::new("world", GpuConstantType::Float4, 0, Variability::PER_OBJECT));
    let vs = ShaderStageObject::new(StageId(1), ShaderStage::Vertex, ShaderHandle(1), "world_vs")
        .with_constants(constants.clone())
        .into_handle();

    let mut cache = ProgramCache::new(LinkStrategy::Monolithic, false);
    cache.set_vertex_stage(Some(vs));
    let mut params = ProgramParameters::for_definitions(&constants);
    params.write_floats(0, &[1.0, 2.0, 3.0, 4.0]);

    let program = cache.active_program(&mut driver, &mut microcode).unwrap().unwrap();
    assert_eq!(program.update_uniforms(&mut driver, &params, Variability::ALL, ShaderStage::Vertex), 1);
    assert_eq!(program.update_uniforms(&mut driver, &params, Variability::ALL, ShaderStage::Vertex), 0);
    assert_eq!(program.update_uniforms(&mut driver, &params, Variability::GLOBAL, ShaderStage::Vertex), 0);

    params.write_floats(0, &[5.0, 6.0, 7.0, 8.0]);
    assert_eq!(program.update_uniforms(&mut driver, &params, Variability::PER_OBJECT, ShaderStage::Vertex), 1);
}
