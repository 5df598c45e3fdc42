use khora_gpu_core::renderer::api::{ContextId, DriverCapabilities, PixelFormat, RenderbufferFormat};
use khora_gpu_core::renderer::testing::{DriverCall, RecordingDriver};
use khora_gpu_gl::fbo::{RenderBufferKey, RenderBufferPool};
use khora_gpu_gl::ContextRegistry;

const MAIN: ContextId = ContextId(1);
const OTHER: ContextId = ContextId(2);

fn setup() -> (RecordingDriver, ContextRegistry) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut driver = RecordingDriver::default();
    let mut contexts = ContextRegistry::new();
    contexts.register(MAIN, DriverCapabilities::default());
    contexts.register(OTHER, DriverCapabilities::default());
    contexts.make_current(&mut driver, MAIN).unwrap();
    (driver, contexts)
}

fn key() -> RenderBufferKey {
    RenderBufferKey::new(RenderbufferFormat::Colour(PixelFormat::Rgba8Unorm), 256, 256, 4)
}

#[test]
fn test_shared_storage_is_created_once_and_destroyed_once() {
    let (mut driver, mut contexts) = setup();
    let mut pool = RenderBufferPool::new();

    let cache = contexts.state_cache_for(&mut driver, MAIN).unwrap();
    let first = pool.request(&mut driver, cache, MAIN, key()).unwrap();
    let cache = contexts.state_cache_for(&mut driver, MAIN).unwrap();
    let second = pool.request(&mut driver, cache, MAIN, key()).unwrap();
    assert_eq!(first, second);
    assert_eq!(pool.refcount(MAIN, key()), Some(2));
    assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::CreateRenderbuffer(_))), 1);

    assert!(!pool.release(&mut driver, &mut contexts, MAIN, key()));
    assert_eq!(driver.live_renderbuffers(), 1);
    assert!(pool.release(&mut driver, &mut contexts, MAIN, key()));
    assert_eq!(driver.live_renderbuffers(), 0);
    assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::DeleteRenderbuffer(_))), 1);
    assert!(pool.is_empty());
    assert_eq!(pool.refcount(MAIN, key()), None);
}

#[test]
fn test_storage_is_not_shared_across_contexts() {
    let (mut driver, mut contexts) = setup();
    let mut pool = RenderBufferPool::new();

    let cache = contexts.state_cache_for(&mut driver, MAIN).unwrap();
    pool.request(&mut driver, cache, MAIN, key()).unwrap();
    let cache = contexts.state_cache_for(&mut driver, OTHER).unwrap();
    pool.request(&mut driver, cache, OTHER, key()).unwrap();
    assert_eq!(pool.len(), 2);
    assert!(!pool.add_ref(ContextId(9), key()));
}

#[test]
fn test_release_from_another_context_is_deferred() {
    let (mut driver, mut contexts) = setup();
    let mut pool = RenderBufferPool::new();

    let cache = contexts.state_cache_for(&mut driver, MAIN).unwrap();
    pool.request(&mut driver, cache, MAIN, key()).unwrap();
    contexts.make_current(&mut driver, OTHER).unwrap();

    assert!(pool.release(&mut driver, &mut contexts, MAIN, key()));
    assert_eq!(driver.live_renderbuffers(), 1);
    assert_eq!(contexts.get(MAIN).unwrap().pending_destroy().len(), 1);

    contexts.make_current(&mut driver, MAIN).unwrap();
    assert_eq!(driver.live_renderbuffers(), 0);
    assert!(contexts.get(MAIN).unwrap().pending_destroy().is_empty());
}

#[test]
fn test_lost_context_entries_are_forgotten_without_driver_calls() {
    let (mut driver, mut contexts) = setup();
    let mut pool = RenderBufferPool::new();

    let cache = contexts.state_cache_for(&mut driver, MAIN).unwrap();
    pool.request(&mut driver, cache, MAIN, key()).unwrap();
    driver.clear_calls();

    pool.notify_context_lost(MAIN);
    assert!(pool.is_empty());
    assert!(driver.calls().is_empty());
}
