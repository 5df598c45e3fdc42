// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::key::ProgramKey;
use super::uniform::{resolve_bindings, UniformBinding, UniformShadow};
use super::LinkStrategy;
use khora_gpu_core::renderer::api::{
    ProgramHandle, ProgramParameters, ProgramPipelineHandle, ShaderStage, ShaderStageHandle,
    ShaderStageObject, Variability,
};
use khora_gpu_core::renderer::{GraphicsDriver, Microcode, MicrocodeCache, ProgramError};

/// A vertex/fragment pair linked into something the driver can draw with.
///
/// Linking happens at most once per context lifetime, on the first
/// [`activate`](Self::activate). A failed link is remembered: later
/// activations report [`ProgramError::PreviouslyFailed`] until
/// [`reset_link_failure`](Self::reset_link_failure) is called.
#[derive(Debug)]
pub struct LinkedProgram {
    key: ProgramKey,
    strategy: LinkStrategy,
    save_microcode: bool,
    stages: [Option<ShaderStageHandle>; 2],

    /// Monolithic program object.
    program: ProgramHandle,
    /// Separable per-stage programs, indexed by [`ShaderStage::index`].
    stage_programs: [ProgramHandle; 2],
    pipeline: ProgramPipelineHandle,

    linked: bool,
    tried_to_link_and_failed: bool,
    uniforms: Option<Vec<UniformBinding>>,
    shadows: [UniformShadow; 2],
}

impl LinkedProgram {
    /// Creates an unlinked program for the given stages.
    pub fn new(
        strategy: LinkStrategy,
        vertex: Option<ShaderStageHandle>,
        fragment: Option<ShaderStageHandle>,
        save_microcode: bool,
    ) -> Self {
        let key = ProgramKey::combine(
            vertex.as_ref().map(|s| s.id()),
            fragment.as_ref().map(|s| s.id()),
        );
        Self {
            key,
            strategy,
            save_microcode,
            stages: [vertex, fragment],
            program: ProgramHandle::NONE,
            stage_programs: [ProgramHandle::NONE; 2],
            pipeline: ProgramPipelineHandle::NONE,
            linked: false,
            tried_to_link_and_failed: false,
            uniforms: None,
            shadows: Default::default(),
        }
    }

    /// The cache key.
    pub fn key(&self) -> ProgramKey {
        self.key
    }

    /// The linking strategy.
    pub fn strategy(&self) -> LinkStrategy {
        self.strategy
    }

    /// Returns `true` once the program is usable.
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Returns `true` if the last link attempt failed.
    pub fn link_failed(&self) -> bool {
        self.tried_to_link_and_failed
    }

    /// The stage in `slot`, if any.
    pub fn stage(&self, slot: ShaderStage) -> Option<&ShaderStageHandle> {
        self.stages[slot.index()].as_ref()
    }

    /// The monolithic program object, or `NONE` for separable programs.
    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    /// The separately linked program of one stage.
    pub fn stage_program(&self, slot: ShaderStage) -> ProgramHandle {
        self.stage_programs[slot.index()]
    }

    /// The pipeline object of a separable program.
    pub fn pipeline(&self) -> ProgramPipelineHandle {
        self.pipeline
    }

    /// Resolved uniform bindings. Empty until the first successful activation.
    pub fn uniform_bindings(&self) -> &[UniformBinding] {
        self.uniforms.as_deref().unwrap_or(&[])
    }

    /// Human-readable name built from the stage names.
    pub fn name(&self) -> String {
        let names: Vec<&str> = self
            .stages
            .iter()
            .flatten()
            .map(|stage| stage.name())
            .collect();
        names.join("+")
    }

    /// Links the program on first use, then makes it current with one driver call.
    ///
    /// A cached binary under the program's key is tried first; the link step
    /// runs only if there is none or the driver rejects it. A successful link
    /// writes its binary back to `microcode` when enabled.
    ///
    /// # Errors
    ///
    /// - [`ProgramError::LinkFailed`] if the driver rejects the link.
    /// - [`ProgramError::PreviouslyFailed`] if an earlier link failed and was not reset.
    /// - [`ProgramError::DriverObjectCreation`] if a program object cannot be created.
    pub fn activate(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        microcode: &mut MicrocodeCache,
    ) -> Result<(), ProgramError> {
        if !self.linked {
            if self.tried_to_link_and_failed {
                return Err(ProgramError::PreviouslyFailed { name: self.name() });
            }
            match self.strategy {
                LinkStrategy::Monolithic => self.link_monolithic(driver, microcode)?,
                LinkStrategy::Separable => self.link_separable(driver, microcode)?,
            }
            self.linked = true;
            self.build_uniform_bindings(driver);
            log::debug!("Linked program '{}' ({:?})", self.name(), self.key);
        }

        match self.strategy {
            LinkStrategy::Monolithic => driver.use_program(self.program),
            LinkStrategy::Separable => driver.bind_program_pipeline(self.pipeline),
        }
        Ok(())
    }

    /// Allows one more link attempt after a failure, for example once the
    /// stages were recompiled with different options.
    pub fn reset_link_failure(&mut self) {
        self.tried_to_link_and_failed = false;
    }

    fn link_monolithic(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        microcode: &mut MicrocodeCache,
    ) -> Result<(), ProgramError> {
        let program = driver.create_program()?;
        let stages: Vec<&ShaderStageObject> = self.stages.iter().flatten().map(|s| s.as_ref()).collect();
        match link_one(driver, microcode, program, self.key, &stages, self.save_microcode) {
            Ok(()) => {
                self.program = program;
                Ok(())
            }
            Err(log) => {
                driver.delete_program(program);
                Err(self.fail(log))
            }
        }
    }

    fn link_separable(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        microcode: &mut MicrocodeCache,
    ) -> Result<(), ProgramError> {
        driver.use_program(ProgramHandle::NONE);

        let mut programs = [ProgramHandle::NONE; 2];
        for slot in ShaderStage::ALL {
            let Some(stage) = self.stages[slot.index()].clone() else {
                continue;
            };
            let program = match driver.create_program() {
                Ok(program) => program,
                Err(err) => {
                    delete_programs(driver, &programs);
                    return Err(err.into());
                }
            };
            driver.set_program_separable(program, true);
            programs[slot.index()] = program;

            let key = ProgramKey::single(slot, stage.id());
            if let Err(log) = link_one(driver, microcode, program, key, &[stage.as_ref()], self.save_microcode) {
                delete_programs(driver, &programs);
                return Err(self.fail(log));
            }
        }

        let pipeline = match driver.create_program_pipeline() {
            Ok(pipeline) => pipeline,
            Err(err) => {
                delete_programs(driver, &programs);
                return Err(err.into());
            }
        };
        for slot in ShaderStage::ALL {
            let program = programs[slot.index()];
            if !program.is_none() {
                driver.use_program_stages(pipeline, slot, program);
            }
        }
        self.stage_programs = programs;
        self.pipeline = pipeline;
        Ok(())
    }

    fn fail(&mut self, log: String) -> ProgramError {
        self.tried_to_link_and_failed = true;
        let name = self.name();
        log::warn!("Program '{}' failed to link: {}", name, log);
        ProgramError::LinkFailed { name, log }
    }

    fn build_uniform_bindings(&mut self, driver: &mut dyn GraphicsDriver) {
        if self.uniforms.is_some() {
            return;
        }
        let bindings = match self.strategy {
            LinkStrategy::Monolithic => {
                let active = driver.active_uniforms(self.program);
                let stages: Vec<&ShaderStageObject> =
                    self.stages.iter().flatten().map(|s| s.as_ref()).collect();
                resolve_bindings(&active, &stages)
            }
            LinkStrategy::Separable => {
                let mut bindings = Vec::new();
                for slot in ShaderStage::ALL {
                    if let Some(stage) = &self.stages[slot.index()] {
                        let active = driver.active_uniforms(self.stage_programs[slot.index()]);
                        bindings.extend(resolve_bindings(&active, &[stage.as_ref()]));
                    }
                }
                bindings
            }
        };
        self.uniforms = Some(bindings);
    }

    /// Uploads the uniforms of `stage` whose variability intersects `mask`.
    /// Values equal to the last upload are skipped. Returns the number of
    /// driver uploads issued.
    ///
    /// The program must be current, as left by [`activate`](Self::activate).
    pub fn update_uniforms(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        params: &ProgramParameters,
        mask: Variability,
        stage: ShaderStage,
    ) -> usize {
        let Some(bindings) = self.uniforms.as_ref() else {
            return 0;
        };
        // Row-major matrices are transposed on upload.
        let transpose = self.stages[stage.index()]
            .as_ref()
            .map_or(true, |s| !s.column_major_matrices());
        let target = match self.strategy {
            LinkStrategy::Monolithic => None,
            LinkStrategy::Separable => Some(self.stage_programs[stage.index()]),
        };
        let shadow = &mut self.shadows[stage.index()];

        let mut uploads = 0;
        for binding in bindings
            .iter()
            .filter(|b| b.stage == stage && b.definition.variability.intersects(mask))
        {
            let Some(data) = params.uniform_data(&binding.definition, transpose) else {
                continue;
            };
            if !shadow.update(binding.location, data.as_bytes()) {
                continue;
            }
            match target {
                None => driver.set_uniform(binding.location, data),
                Some(program) => driver.set_program_uniform(program, binding.location, data),
            }
            uploads += 1;
        }
        uploads
    }

    /// Uploads only the pass iteration counter, regardless of variability
    /// masks. Returns `true` if a uniform was written.
    pub fn update_pass_iteration_uniforms(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        params: &ProgramParameters,
    ) -> bool {
        let Some(index) = params.pass_iteration_index() else {
            return false;
        };
        let Some(binding) = self.uniforms.as_ref().and_then(|bindings| {
            bindings.iter().find(|b| {
                b.definition.physical_index == index
                    && b.definition.variability.contains(Variability::PASS_ITERATION_NUMBER)
            })
        }) else {
            return false;
        };
        let Some(data) = params.uniform_data(&binding.definition, false) else {
            return false;
        };

        self.shadows[binding.stage.index()].update(binding.location, data.as_bytes());
        match self.strategy {
            LinkStrategy::Monolithic => driver.set_uniform(binding.location, data),
            LinkStrategy::Separable => {
                let program = self.stage_programs[binding.stage.index()];
                driver.set_program_uniform(program, binding.location, data)
            }
        }
        true
    }

    /// Forgets every driver handle after context loss. The program relinks
    /// on its next activation.
    pub fn notify_context_lost(&mut self) {
        self.program = ProgramHandle::NONE;
        self.stage_programs = [ProgramHandle::NONE; 2];
        self.pipeline = ProgramPipelineHandle::NONE;
        self.linked = false;
        self.uniforms = None;
        for shadow in &mut self.shadows {
            shadow.clear();
        }
    }

    /// Deletes the driver objects. The program can be relinked afterwards.
    pub fn destroy(&mut self, driver: &mut dyn GraphicsDriver) {
        if !self.program.is_none() {
            driver.delete_program(self.program);
        }
        delete_programs(driver, &self.stage_programs);
        if !self.pipeline.is_none() {
            driver.delete_program_pipeline(self.pipeline);
        }
        self.notify_context_lost();
    }
}

/// Loads `program` from the microcode cache or links it from `stages`.
/// On failure returns the driver's info log.
fn link_one(
    driver: &mut dyn GraphicsDriver,
    microcode: &mut MicrocodeCache,
    program: ProgramHandle,
    key: ProgramKey,
    stages: &[&ShaderStageObject],
    save_microcode: bool,
) -> Result<(), String> {
    if let Some(cached) = microcode.get(key.as_u64()) {
        if driver.load_program_binary(program, cached.format, &cached.blob) {
            log::trace!("Program {:?} restored from microcode", key);
            return Ok(());
        }
        log::debug!("Cached binary for {:?} was rejected; relinking", key);
        microcode.remove(key.as_u64());
    }

    for stage in stages {
        driver.attach_shader(program, stage.shader());
    }
    if !driver.link_program(program) {
        return Err(driver.program_info_log(program));
    }

    if save_microcode {
        if let Some((format, blob)) = driver.program_binary(program) {
            microcode.insert(key.as_u64(), &Microcode { format, blob });
        }
    }
    Ok(())
}

fn delete_programs(driver: &mut dyn GraphicsDriver, programs: &[ProgramHandle]) {
    for program in programs.iter().filter(|p| !p.is_none()) {
        driver.delete_program(*program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khora_gpu_core::renderer::api::{
        ConstantDefinition, ConstantDefinitions, DriverCapabilities, DriverFeatures,
        GpuConstantType, ShaderHandle, StageId,
    };
    use khora_gpu_core::renderer::testing::{DriverCall, RecordingDriver};

    fn vertex_stage() -> ShaderStageHandle {
        let constants: ConstantDefinitions = [
            ConstantDefinition::new("world", GpuConstantType::Matrix4x4, 0, Variability::PER_OBJECT),
            ConstantDefinition::new("pass", GpuConstantType::Float1, 16, Variability::PASS_ITERATION_NUMBER),
        ]
        .into_iter()
        .collect();
        ShaderStageObject::new(StageId(1), ShaderStage::Vertex, ShaderHandle(101), "basic_vs")
            .with_constants(constants)
            .into_handle()
    }

    fn fragment_stage() -> ShaderStageHandle {
        let constants: ConstantDefinitions =
            [ConstantDefinition::new("tint", GpuConstantType::Float4, 0, Variability::GLOBAL)]
                .into_iter()
                .collect();
        ShaderStageObject::new(StageId(2), ShaderStage::Fragment, ShaderHandle(102), "basic_fs")
            .with_constants(constants)
            .with_column_major_matrices(true)
            .into_handle()
    }

    fn binary_driver() -> RecordingDriver {
        let caps = DriverCapabilities {
            features: DriverFeatures::default() | DriverFeatures::PROGRAM_BINARY,
            ..Default::default()
        };
        let mut driver = RecordingDriver::new(caps);
        driver.register_uniforms(ShaderHandle(101), &[("world", 1), ("pass", 1)]);
        driver.register_uniforms(ShaderHandle(102), &[("tint", 1)]);
        driver
    }

    fn monolithic() -> LinkedProgram {
        LinkedProgram::new(
            LinkStrategy::Monolithic,
            Some(vertex_stage()),
            Some(fragment_stage()),
            true,
        )
    }

    #[test]
    fn test_links_once_then_only_binds() {
        let mut driver = binary_driver();
        let mut microcode = MicrocodeCache::new();
        let mut program = monolithic();

        program.activate(&mut driver, &mut microcode).unwrap();
        program.activate(&mut driver, &mut microcode).unwrap();

        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::LinkProgram(_))), 1);
        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::UseProgram(_))), 2);
        assert_eq!(program.uniform_bindings().len(), 3);
        assert!(microcode.contains(program.key().as_u64()));
    }

    #[test]
    fn test_cached_binary_skips_link_step() {
        let mut driver = binary_driver();
        let mut microcode = MicrocodeCache::new();
        monolithic().activate(&mut driver, &mut microcode).unwrap();
        driver.clear_calls();

        let mut program = monolithic();
        program.activate(&mut driver, &mut microcode).unwrap();
        assert!(program.is_linked());
        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::LoadProgramBinary(_))), 1);
        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::LinkProgram(_))), 0);
    }

    #[test]
    fn test_rejected_binary_falls_back_to_link() {
        let mut driver = binary_driver();
        let mut microcode = MicrocodeCache::new();
        monolithic().activate(&mut driver, &mut microcode).unwrap();
        driver.set_reject_binaries(true);
        driver.clear_calls();

        let mut program = monolithic();
        program.activate(&mut driver, &mut microcode).unwrap();
        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::LinkProgram(_))), 1);
        assert!(microcode.contains(program.key().as_u64()));
    }

    #[test]
    fn test_link_failure_is_remembered_until_reset() {
        let mut driver = binary_driver();
        driver.fail_link_with(ShaderHandle(102));
        let mut microcode = MicrocodeCache::new();
        let mut program = monolithic();

        let err = program.activate(&mut driver, &mut microcode).unwrap_err();
        assert!(matches!(err, ProgramError::LinkFailed { ref name, .. } if name == "basic_vs+basic_fs"));
        assert_eq!(driver.live_programs(), 0);

        driver.allow_link_with(ShaderHandle(102));
        assert!(matches!(
            program.activate(&mut driver, &mut microcode),
            Err(ProgramError::PreviouslyFailed { .. })
        ));

        program.reset_link_failure();
        program.activate(&mut driver, &mut microcode).unwrap();
        assert!(program.is_linked());
    }

    #[test]
    fn test_uniform_uploads_are_filtered_and_shadowed() {
        let mut driver = binary_driver();
        let mut microcode = MicrocodeCache::new();
        let mut program = monolithic();
        program.activate(&mut driver, &mut microcode).unwrap();

        let mut params = ProgramParameters::new();
        params.write_floats(0, &[1.0; 17]);

        let uploads = program.update_uniforms(&mut driver, &params, Variability::GLOBAL, ShaderStage::Vertex);
        assert_eq!(uploads, 0);
        let uploads = program.update_uniforms(&mut driver, &params, Variability::ALL, ShaderStage::Vertex);
        assert_eq!(uploads, 2);
        let uploads = program.update_uniforms(&mut driver, &params, Variability::ALL, ShaderStage::Vertex);
        assert_eq!(uploads, 0);

        params.write_floats(0, &[2.0]);
        let uploads = program.update_uniforms(&mut driver, &params, Variability::PER_OBJECT, ShaderStage::Vertex);
        assert_eq!(uploads, 1);

        let uploads = program.update_uniforms(&mut driver, &params, Variability::ALL, ShaderStage::Fragment);
        assert_eq!(uploads, 1);
    }

    #[test]
    fn test_pass_iteration_bypasses_shadow_and_mask() {
        let mut driver = binary_driver();
        let mut microcode = MicrocodeCache::new();
        let mut program = monolithic();
        program.activate(&mut driver, &mut microcode).unwrap();

        let mut params = ProgramParameters::new();
        params.write_floats(0, &[0.0; 17]);
        params.set_pass_iteration_index(16);
        driver.clear_calls();

        assert!(program.update_pass_iteration_uniforms(&mut driver, &params));
        assert!(program.update_pass_iteration_uniforms(&mut driver, &params));
        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::SetUniform { .. })), 2);
    }

    #[test]
    fn test_separable_programs_upload_per_stage() {
        let mut driver = binary_driver();
        let mut microcode = MicrocodeCache::new();
        let mut program = LinkedProgram::new(
            LinkStrategy::Separable,
            Some(vertex_stage()),
            Some(fragment_stage()),
            true,
        );
        program.activate(&mut driver, &mut microcode).unwrap();
        program.activate(&mut driver, &mut microcode).unwrap();

        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::LinkProgram(_))), 2);
        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::BindProgramPipeline(_))), 2);
        assert_eq!(microcode.len(), 2);

        let mut params = ProgramParameters::new();
        params.write_floats(0, &[0.5; 4]);
        program.update_uniforms(&mut driver, &params, Variability::ALL, ShaderStage::Fragment);
        let fragment_program = program.stage_program(ShaderStage::Fragment);
        assert_eq!(
            driver.count_calls(
                |c| matches!(c, DriverCall::SetProgramUniform { program, .. } if *program == fragment_program)
            ),
            1
        );
    }

    #[test]
    fn test_context_loss_forces_relink() {
        let mut driver = binary_driver();
        let mut microcode = MicrocodeCache::new();
        let mut program = monolithic();
        program.activate(&mut driver, &mut microcode).unwrap();

        driver.lose_context();
        program.notify_context_lost();
        assert!(!program.is_linked());
        assert!(program.uniform_bindings().is_empty());

        program.activate(&mut driver, &mut microcode).unwrap();
        assert!(driver.is_live(khora_gpu_core::renderer::api::DriverObject::Program(program.program())));
    }
}
