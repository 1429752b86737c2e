//! Reference counting of command buffers and commands.

use std::sync::Arc;

use cmdgraph_core::{
    CommandBufferDesc, ContextHandle, ErrorKind, Kernel, LifecycleCounter, LifecycleObserver,
    NdRange, ObjectKind,
};
use cmdgraph_reference::{
    KernelRegistry, ReferenceCommand, ReferenceCommandBuffer, ReferenceDevice, ReferenceEmitter,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn observed() -> (ReferenceCommandBuffer, Arc<Kernel>, Arc<LifecycleCounter>) {
    let device = ReferenceDevice::new(4096);
    let emitter = ReferenceEmitter::new(device, KernelRegistry::with_builtins().unwrap()).shared();
    let ctx = ContextHandle::create();
    let counter = Arc::new(LifecycleCounter::new());
    let observer: Arc<dyn LifecycleObserver> = counter.clone();
    let cb = ReferenceCommandBuffer::create_observed(
        emitter,
        ctx,
        CommandBufferDesc::updatable(),
        Some(observer),
    )
    .unwrap();
    (cb, Arc::new(Kernel::new(ctx, "iota_u32")), counter)
}

fn launch(cb: &ReferenceCommandBuffer, kernel: &Arc<Kernel>) -> ReferenceCommand {
    cb.append_kernel_launch(kernel, &NdRange::linear(4), &[]).unwrap().command.unwrap()
}

// ===========================================================================
// Release ordering
// ===========================================================================

#[test]
fn commands_keep_their_buffer_alive() {
    let (cb, kernel, counter) = observed();
    let c1 = launch(&cb, &kernel);
    let c2 = launch(&cb, &kernel);
    assert_eq!(counter.live(ObjectKind::Command), 2);
    assert_eq!(c1.reference_count(), 1);

    cb.release().unwrap();
    assert!(!cb.is_destroyed());
    assert_eq!(counter.live(ObjectKind::CommandBuffer), 1);

    c1.release().unwrap();
    assert!(c1.is_destroyed());
    assert!(!cb.is_destroyed());

    c2.release().unwrap();
    assert!(c2.is_destroyed());
    assert!(cb.is_destroyed());
    assert_eq!(counter.destroyed_count(ObjectKind::CommandBuffer), 1);
    assert_eq!(counter.destroyed_count(ObjectKind::Command), 2);
}

#[test]
fn buffer_release_after_commands_destroys_everything() {
    let (cb, kernel, counter) = observed();
    let c1 = launch(&cb, &kernel);
    let c2 = launch(&cb, &kernel);

    c1.release().unwrap();
    c2.release().unwrap();
    assert!(!c1.is_destroyed() && !c2.is_destroyed());
    assert_eq!(counter.live(ObjectKind::Command), 2);

    cb.release().unwrap();
    assert!(cb.is_destroyed());
    assert!(c1.is_destroyed() && c2.is_destroyed());
    assert_eq!(counter.live(ObjectKind::Command), 0);
    assert_eq!(counter.live(ObjectKind::CommandBuffer), 0);
}

#[test]
fn retain_balances_release() {
    let (cb, _kernel, counter) = observed();
    cb.retain().unwrap();
    assert_eq!(cb.reference_count(), 2);
    assert_eq!(cb.info().unwrap().reference_count, 2);

    cb.release().unwrap();
    assert!(!cb.is_destroyed());
    cb.release().unwrap();
    assert!(cb.is_destroyed());
    assert_eq!(counter.created_count(ObjectKind::CommandBuffer), 1);
    assert_eq!(counter.destroyed_count(ObjectKind::CommandBuffer), 1);
}

#[test]
fn command_retain_delays_destruction() {
    let (cb, kernel, _counter) = observed();
    let c = launch(&cb, &kernel);
    c.retain().unwrap();
    assert_eq!(c.reference_count(), 2);
    c.release().unwrap();
    cb.release().unwrap();
    assert!(!c.is_destroyed());
    assert!(!cb.is_destroyed());
    c.release().unwrap();
    assert!(c.is_destroyed());
    assert!(cb.is_destroyed());
}

// ===========================================================================
// Released objects
// ===========================================================================

#[test]
fn released_buffer_rejects_everything() {
    let (cb, kernel, _counter) = observed();
    cb.release().unwrap();
    assert!(cb.is_destroyed());

    assert_eq!(cb.release().unwrap_err().kind(), ErrorKind::InvalidOperation);
    assert_eq!(cb.retain().unwrap_err().kind(), ErrorKind::InvalidOperation);
    assert_eq!(cb.finalize().unwrap_err().kind(), ErrorKind::InvalidOperation);
    assert_eq!(cb.info().unwrap_err().kind(), ErrorKind::InvalidOperation);
    let err = cb.append_kernel_launch(&kernel, &NdRange::linear(4), &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
}

#[test]
fn command_released_twice_is_an_error() {
    let (cb, kernel, _counter) = observed();
    let c = launch(&cb, &kernel);
    c.release().unwrap();
    assert_eq!(c.release().unwrap_err().kind(), ErrorKind::InvalidOperation);
    assert_eq!(c.command_buffer().handle(), cb.handle());
}

#[test]
fn command_handles_and_buffer_handles_are_distinct() {
    let (cb, kernel, _counter) = observed();
    let c1 = launch(&cb, &kernel);
    let c2 = launch(&cb, &kernel);
    assert_ne!(c1.handle(), c2.handle());
    assert_ne!(c1.handle(), cb.handle());
    assert_eq!(cb.info().unwrap().commands, 2);
    assert_eq!(c1.kernel().name(), "iota_u32");
}
