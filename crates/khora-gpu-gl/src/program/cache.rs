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
use super::linked::LinkedProgram;
use super::LinkStrategy;
use ahash::AHashMap;
use khora_gpu_core::renderer::api::{ShaderStageHandle, StageId};
use khora_gpu_core::renderer::{GraphicsDriver, MicrocodeCache, ProgramError};
use std::sync::Arc;

/// Linked programs keyed by their stage pair, plus the two active slots.
///
/// Changing a slot only marks the active program as unresolved; the lookup
/// and any linking happen lazily in [`active_program`](Self::active_program).
#[derive(Debug)]
pub struct ProgramCache {
    strategy: LinkStrategy,
    save_microcode: bool,
    programs: AHashMap<ProgramKey, LinkedProgram>,
    vertex: Option<ShaderStageHandle>,
    fragment: Option<ShaderStageHandle>,
    active: Option<ProgramKey>,
}

fn same_stage(current: &Option<ShaderStageHandle>, next: &Option<ShaderStageHandle>) -> bool {
    match (current, next) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a.id() == b.id(),
        _ => false,
    }
}

impl ProgramCache {
    /// Creates an empty cache.
    pub fn new(strategy: LinkStrategy, save_microcode: bool) -> Self {
        Self {
            strategy,
            save_microcode,
            programs: AHashMap::new(),
            vertex: None,
            fragment: None,
            active: None,
        }
    }

    /// The strategy every program in this cache links with.
    pub fn strategy(&self) -> LinkStrategy {
        self.strategy
    }

    /// Selects the vertex stage. Selecting the current stage again is a no-op.
    pub fn set_vertex_stage(&mut self, stage: Option<ShaderStageHandle>) {
        if !same_stage(&self.vertex, &stage) {
            self.vertex = stage;
            self.active = None;
        }
    }

    /// Selects the fragment stage. Selecting the current stage again is a no-op.
    pub fn set_fragment_stage(&mut self, stage: Option<ShaderStageHandle>) {
        if !same_stage(&self.fragment, &stage) {
            self.fragment = stage;
            self.active = None;
        }
    }

    /// The key of the currently bound stage pair.
    pub fn current_key(&self) -> ProgramKey {
        ProgramKey::combine(
            self.vertex.as_ref().map(|s| s.id()),
            self.fragment.as_ref().map(|s| s.id()),
        )
    }

    /// The key of the resolved active program, if any.
    pub fn active_key(&self) -> Option<ProgramKey> {
        self.active
    }

    /// Resolves, links if needed, and binds the program for the current stage pair.
    ///
    /// Returns `Ok(None)` when both slots are empty. When the active program
    /// is already resolved it is returned without any driver call.
    ///
    /// # Errors
    ///
    /// Propagates [`LinkedProgram::activate`] failures. The failed entry
    /// stays cached.
    pub fn active_program(
        &mut self,
        driver: &mut dyn GraphicsDriver,
        microcode: &mut MicrocodeCache,
    ) -> Result<Option<&mut LinkedProgram>, ProgramError> {
        if let Some(key) = self.active {
            if self.programs.contains_key(&key) {
                return Ok(self.programs.get_mut(&key));
            }
            self.active = None;
        }

        let key = self.current_key();
        if key.is_none() {
            return Ok(None);
        }

        let strategy = self.strategy;
        let save_microcode = self.save_microcode;
        let (vertex, fragment) = (&self.vertex, &self.fragment);
        let program = self.programs.entry(key).or_insert_with(|| {
            log::debug!("Creating program entry {:?}", key);
            LinkedProgram::new(strategy, vertex.clone(), fragment.clone(), save_microcode)
        });
        program.activate(driver, microcode)?;
        self.active = Some(key);
        Ok(Some(program))
    }

    /// Forgets the resolved program so the next activation binds it again,
    /// e.g. on a newly current context.
    pub fn forget_active(&mut self) {
        self.active = None;
    }

    /// Looks up a cached program.
    pub fn get(&self, key: ProgramKey) -> Option<&LinkedProgram> {
        self.programs.get(&key)
    }

    /// Looks up a cached program mutably.
    pub fn get_mut(&mut self, key: ProgramKey) -> Option<&mut LinkedProgram> {
        self.programs.get_mut(&key)
    }

    /// Number of cached programs, linked or not.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Clears the failure mark of a program so the next activation links it
    /// again. Returns `false` if the key is unknown.
    pub fn retry_link(&mut self, key: ProgramKey) -> bool {
        match self.programs.get_mut(&key) {
            Some(program) => {
                program.reset_link_failure();
                true
            }
            None => false,
        }
    }

    /// Destroys and forgets every program built from `stage`. Returns how
    /// many were removed. Called when the material system unloads a stage.
    pub fn destroy_programs_using(&mut self, driver: &mut dyn GraphicsDriver, stage: StageId) -> usize {
        let doomed: Vec<ProgramKey> = self
            .programs
            .keys()
            .filter(|key| key.uses(stage))
            .copied()
            .collect();
        for key in &doomed {
            if let Some(mut program) = self.programs.remove(key) {
                program.destroy(driver);
            }
            if self.active == Some(*key) {
                self.active = None;
            }
        }
        if self.vertex.as_ref().is_some_and(|s| s.id() == stage) {
            self.vertex = None;
        }
        if self.fragment.as_ref().is_some_and(|s| s.id() == stage) {
            self.fragment = None;
        }
        doomed.len()
    }

    /// Destroys every program.
    pub fn destroy_all(&mut self, driver: &mut dyn GraphicsDriver) {
        for program in self.programs.values_mut() {
            program.destroy(driver);
        }
        self.programs.clear();
        self.active = None;
    }

    /// Drops every driver handle while keeping entries and stage handles.
    /// Programs relink lazily once the context is back.
    pub fn notify_context_lost(&mut self) {
        for program in self.programs.values_mut() {
            program.notify_context_lost();
        }
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khora_gpu_core::renderer::api::{ShaderHandle, ShaderStage, ShaderStageObject};
    use khora_gpu_core::renderer::testing::{DriverCall, RecordingDriver};

    fn stage(id: u32, kind: ShaderStage) -> ShaderStageHandle {
        ShaderStageObject::new(StageId(id), kind, ShaderHandle(100 + id), format!("s{id}")).into_handle()
    }

    #[test]
    fn test_resolved_program_needs_no_driver_work() {
        let mut driver = RecordingDriver::default();
        let mut microcode = MicrocodeCache::new();
        let mut cache = ProgramCache::new(LinkStrategy::Monolithic, false);
        cache.set_vertex_stage(Some(stage(1, ShaderStage::Vertex)));
        cache.set_fragment_stage(Some(stage(2, ShaderStage::Fragment)));

        cache.active_program(&mut driver, &mut microcode).unwrap();
        driver.clear_calls();
        cache.active_program(&mut driver, &mut microcode).unwrap();
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_same_stage_reselection_keeps_active_program() {
        let mut driver = RecordingDriver::default();
        let mut microcode = MicrocodeCache::new();
        let mut cache = ProgramCache::new(LinkStrategy::Monolithic, false);
        let vs = stage(1, ShaderStage::Vertex);
        cache.set_vertex_stage(Some(vs.clone()));
        cache.active_program(&mut driver, &mut microcode).unwrap();

        cache.set_vertex_stage(Some(vs));
        assert!(cache.active_key().is_some());
        cache.set_vertex_stage(Some(stage(3, ShaderStage::Vertex)));
        assert!(cache.active_key().is_none());
    }

    #[test]
    fn test_empty_slots_yield_no_program() {
        let mut driver = RecordingDriver::default();
        let mut microcode = MicrocodeCache::new();
        let mut cache = ProgramCache::new(LinkStrategy::Monolithic, false);
        assert!(cache.active_program(&mut driver, &mut microcode).unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_entry_is_retained_and_retried_explicitly() {
        let mut driver = RecordingDriver::default();
        driver.fail_link_with(ShaderHandle(101));
        let mut microcode = MicrocodeCache::new();
        let mut cache = ProgramCache::new(LinkStrategy::Monolithic, false);
        cache.set_vertex_stage(Some(stage(1, ShaderStage::Vertex)));

        assert!(matches!(
            cache.active_program(&mut driver, &mut microcode),
            Err(ProgramError::LinkFailed { .. })
        ));
        assert_eq!(cache.len(), 1);
        assert!(matches!(
            cache.active_program(&mut driver, &mut microcode),
            Err(ProgramError::PreviouslyFailed { .. })
        ));
        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::LinkProgram(_))), 1);

        driver.allow_link_with(ShaderHandle(101));
        assert!(cache.retry_link(cache.current_key()));
        assert!(cache.active_program(&mut driver, &mut microcode).unwrap().is_some());
    }

    #[test]
    fn test_unloading_a_stage_destroys_its_programs() {
        let mut driver = RecordingDriver::default();
        let mut microcode = MicrocodeCache::new();
        let mut cache = ProgramCache::new(LinkStrategy::Monolithic, false);
        let vs = stage(1, ShaderStage::Vertex);
        for fragment in [2, 3] {
            cache.set_vertex_stage(Some(vs.clone()));
            cache.set_fragment_stage(Some(stage(fragment, ShaderStage::Fragment)));
            cache.active_program(&mut driver, &mut microcode).unwrap();
        }
        cache.set_vertex_stage(Some(stage(4, ShaderStage::Vertex)));
        cache.active_program(&mut driver, &mut microcode).unwrap();
        assert_eq!(driver.live_programs(), 3);

        assert_eq!(cache.destroy_programs_using(&mut driver, StageId(1)), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(driver.live_programs(), 1);
    }
}
