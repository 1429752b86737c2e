//! Record, finalize, submit and update on the CPU reference backend.

use std::sync::Arc;

use cmdgraph_core::{
    CommandBufferDesc, ContextHandle, DevicePtr, ErrorKind, Kernel, KernelLaunchUpdate, Location,
    NdRange, RectCopy, RectOffset, RectPitch, RectRegion,
};
use cmdgraph_reference::{
    HostQueue, KernelRegistry, ReferenceBuffer, ReferenceCommandBuffer, ReferenceDevice,
    ReferenceEmitter,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Rig {
    device: ReferenceDevice,
    emitter: Arc<ReferenceEmitter>,
    ctx: ContextHandle,
}

fn rig() -> Rig {
    let device = ReferenceDevice::new(1 << 20);
    let kernels = KernelRegistry::with_builtins().unwrap();
    let emitter = ReferenceEmitter::new(device.clone(), kernels).shared();
    Rig { device, emitter, ctx: ContextHandle::create() }
}

impl Rig {
    fn buffer(&self, desc: CommandBufferDesc) -> ReferenceCommandBuffer {
        ReferenceCommandBuffer::create(Arc::clone(&self.emitter), self.ctx, desc).unwrap()
    }

    fn words(&self, values: &[u32]) -> DevicePtr {
        let ptr = self.device.alloc_device(values.len() * 4).unwrap();
        self.device.write_u32s(ptr, values).unwrap();
        ptr
    }
}

// ===========================================================================
// Record once, replay many
// ===========================================================================

#[test]
fn two_kernel_graph_replays_and_updates() -> anyhow::Result<()> {
    let rig = rig();
    let n = 64;
    let a_vals: Vec<u32> = (0..n as u32).collect();
    let a = rig.words(&a_vals);
    let b = rig.words(&vec![100; n]);
    let c = rig.words(&vec![1000; n]);
    let out = rig.words(&vec![0; n]);

    // out = a + b; out = 2 * a + out
    let k1 = Arc::new(Kernel::new(rig.ctx, "add_u32"));
    k1.set_pointer_arg(0, a)?;
    k1.set_pointer_arg(1, b)?;
    k1.set_pointer_arg(2, out)?;
    let k2 = Arc::new(Kernel::new(rig.ctx, "axpy_u32"));
    k2.set_value_arg(0, &2u32.to_le_bytes())?;
    k2.set_pointer_arg(1, a)?;
    k2.set_pointer_arg(2, out)?;

    let cb = rig.buffer(CommandBufferDesc::updatable());
    let first = cb.append_kernel_launch(&k1, &NdRange::linear(n), &[])?;
    let second = cb.append_kernel_launch(&k2, &NdRange::linear(n), &[first.sync_point])?;
    assert_eq!((first.sync_point.id(), second.sync_point.id()), (0, 1));
    cb.finalize()?;

    let queue = HostQueue::immediate(rig.device.clone());
    let expected: Vec<u32> = a_vals.iter().map(|x| 3 * x + 100).collect();
    cb.enqueue(&queue, &[])?;
    assert_eq!(rig.device.read_u32s(out, n)?, expected);
    cb.enqueue(&queue, &[])?;
    assert_eq!(rig.device.read_u32s(out, n)?, expected);

    let add = first.command.expect("non-empty launch yields a command");
    add.update(&KernelLaunchUpdate::new().pointer_arg(1, c))?;
    cb.enqueue(&queue, &[])?;
    let expected: Vec<u32> = a_vals.iter().map(|x| 3 * x + 1000).collect();
    assert_eq!(rig.device.read_u32s(out, n)?, expected);
    assert_eq!(queue.submission_count()?, 3);
    Ok(())
}

#[test]
fn in_flight_submission_keeps_its_parameters() -> anyhow::Result<()> {
    let rig = rig();
    let p1 = rig.words(&[0; 8]);
    let p2 = rig.words(&[0; 8]);

    let fill = Arc::new(Kernel::new(rig.ctx, "fill_u32"));
    fill.set_pointer_arg(0, p1)?;
    fill.set_value_arg(1, &7u32.to_le_bytes())?;

    let cb = rig.buffer(CommandBufferDesc::updatable());
    let command = cb.append_kernel_launch(&fill, &NdRange::linear(8), &[])?.command.unwrap();
    cb.finalize()?;

    let queue = HostQueue::deferred(rig.device.clone());
    let done_first = cb.enqueue_with_signal(&queue, &[])?;
    command.update(&KernelLaunchUpdate::new().pointer_arg(0, p2).value_arg(1, &9u32.to_le_bytes()))?;
    let done_second = cb.enqueue_with_signal(&queue, &[])?;

    assert_eq!(queue.pending_count()?, 2);
    assert!(!done_first.is_complete());
    assert_eq!(rig.device.read_u32s(p1, 8)?, vec![0; 8]);

    assert_eq!(queue.flush()?, 2);
    assert!(done_first.is_complete() && done_second.is_complete());
    assert_eq!(rig.device.read_u32s(p1, 8)?, vec![7; 8]);
    assert_eq!(rig.device.read_u32s(p2, 8)?, vec![9; 8]);
    Ok(())
}

#[test]
fn wait_on_unfinished_event_fails_at_flush() -> anyhow::Result<()> {
    let rig = rig();
    let cb = rig.buffer(CommandBufferDesc::default());
    cb.finalize()?;

    let other = HostQueue::deferred(rig.device.clone());
    let pending = cb.enqueue_with_signal(&other, &[])?;

    let queue = HostQueue::deferred(rig.device.clone());
    let blocked = cb.enqueue_with_signal(&queue, &[pending.clone()])?;
    cb.enqueue(&queue, &[])?;
    let err = queue.flush().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert_eq!(queue.pending_count()?, 2);
    assert_eq!(queue.completed_count()?, 0);
    assert!(!blocked.is_complete());

    // Once the awaited work has run, the blocked submission is retried.
    other.flush()?;
    assert!(pending.is_complete());
    assert_eq!(queue.flush()?, 2);
    assert!(blocked.is_complete());
    assert_eq!(queue.pending_count()?, 0);
    Ok(())
}

#[test]
fn empty_launch_records_a_no_op() -> anyhow::Result<()> {
    let rig = rig();
    let out = rig.words(&[5; 4]);
    let fill = Arc::new(Kernel::new(rig.ctx, "fill_u32"));
    fill.set_pointer_arg(0, out)?;
    fill.set_value_arg(1, &1u32.to_le_bytes())?;

    let cb = rig.buffer(CommandBufferDesc::default());
    let empty = cb.append_kernel_launch(&fill, &NdRange::new(1, None, &[0], None)?, &[])?;
    assert!(empty.command.is_none());
    let next = cb.append_kernel_launch(&fill, &NdRange::linear(2), &[empty.sync_point])?;
    assert_eq!(next.sync_point.id(), 1);
    cb.finalize()?;
    cb.enqueue(&HostQueue::immediate(rig.device.clone()), &[])?;
    assert_eq!(rig.device.read_u32s(out, 4)?, vec![1, 1, 5, 5]);
    Ok(())
}

// ===========================================================================
// Copies and fills
// ===========================================================================

#[test]
fn buffer_write_copy_read_round_trip() -> anyhow::Result<()> {
    let rig = rig();
    let staging_in = rig.device.alloc_host(16)?;
    let staging_out = rig.device.alloc_host(16)?;
    rig.device.write(staging_in, &(0u8..16).collect::<Vec<_>>())?;
    let src = ReferenceBuffer::new(&rig.device, 32)?;
    let dst = ReferenceBuffer::new(&rig.device, 32)?;

    let cb = rig.buffer(CommandBufferDesc::default());
    let w = cb.append_buffer_write(&src, 8, staging_in, 16, &[])?;
    let c = cb.append_buffer_copy(&src, &dst, 8, 0, 16, &[w])?;
    cb.append_buffer_read(&dst, 0, staging_out, 16, &[c])?;
    cb.finalize()?;
    cb.enqueue(&HostQueue::immediate(rig.device.clone()), &[])?;

    assert_eq!(rig.device.read(staging_out, 16)?, (0u8..16).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn copy_past_the_end_of_a_buffer_is_rejected() -> anyhow::Result<()> {
    let rig = rig();
    let src = ReferenceBuffer::new(&rig.device, 16)?;
    let dst = ReferenceBuffer::new(&rig.device, 16)?;
    let cb = rig.buffer(CommandBufferDesc::default());
    let err = cb.append_buffer_copy(&src, &dst, 8, 0, 16, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSize);
    assert_eq!(cb.info()?.sync_points, 0);
    Ok(())
}

#[test]
fn usm_memcpy_between_host_and_shared() -> anyhow::Result<()> {
    let rig = rig();
    let host = rig.device.alloc_host(8)?;
    let shared = rig.device.alloc_shared(8)?;
    rig.device.write(host, b"cmdgraph")?;

    let cb = rig.buffer(CommandBufferDesc::default());
    cb.append_memcpy(Location::shared(shared), Location::host(host), 8, &[])?;
    cb.finalize()?;
    cb.enqueue(&HostQueue::immediate(rig.device.clone()), &[])?;
    assert_eq!(rig.device.read(shared, 8)?, b"cmdgraph");
    Ok(())
}

#[test]
fn rect_copy_extracts_a_sub_block() -> anyhow::Result<()> {
    let rig = rig();
    let src = ReferenceBuffer::new(&rig.device, 16)?;
    let dst = ReferenceBuffer::new(&rig.device, 4)?;
    rig.device.write(src.ptr(), &(0u8..16).collect::<Vec<_>>())?;

    // 4x4 bytes, take the 2x2 block at (1, 1)
    let rect = RectCopy {
        src_origin: RectOffset::new(1, 1, 0),
        dst_origin: RectOffset::default(),
        region: RectRegion::new(2, 2, 1),
        src_pitch: RectPitch::new(4, 16),
        dst_pitch: RectPitch::default(),
    };
    let cb = rig.buffer(CommandBufferDesc::default());
    cb.append_buffer_copy_rect(&src, &dst, &rect, &[])?;
    cb.finalize()?;
    cb.enqueue(&HostQueue::immediate(rig.device.clone()), &[])?;
    assert_eq!(rig.device.read(dst.ptr(), 4)?, vec![5, 6, 9, 10]);
    Ok(())
}

#[test]
fn rect_write_and_read_through_host_memory() -> anyhow::Result<()> {
    let rig = rig();
    let host_in = rig.device.alloc_host(4)?;
    let host_out = rig.device.alloc_host(4)?;
    rig.device.write(host_in, &[1, 2, 3, 4])?;
    let image = ReferenceBuffer::new(&rig.device, 16)?;

    // host 2x2 packed <-> image 4x4 at (2, 2)
    let into_image = RectCopy {
        src_origin: RectOffset::default(),
        dst_origin: RectOffset::new(2, 2, 0),
        region: RectRegion::new(2, 2, 1),
        src_pitch: RectPitch::default(),
        dst_pitch: RectPitch::new(4, 16),
    };
    let out_of_image = RectCopy {
        src_origin: into_image.dst_origin,
        dst_origin: into_image.src_origin,
        src_pitch: into_image.dst_pitch,
        dst_pitch: into_image.src_pitch,
        ..into_image
    };

    let cb = rig.buffer(CommandBufferDesc::default());
    let w = cb.append_buffer_write_rect(&image, host_in, &into_image, &[])?;
    cb.append_buffer_read_rect(&image, host_out, &out_of_image, &[w])?;
    cb.finalize()?;
    cb.enqueue(&HostQueue::immediate(rig.device.clone()), &[])?;

    let mut expected = vec![0u8; 16];
    expected[10] = 1;
    expected[11] = 2;
    expected[14] = 3;
    expected[15] = 4;
    assert_eq!(rig.device.read(image.ptr(), 16)?, expected);
    assert_eq!(rig.device.read(host_out, 4)?, vec![1, 2, 3, 4]);
    Ok(())
}

#[test]
fn eight_byte_fill_is_emulated_exactly() -> anyhow::Result<()> {
    let rig = rig();
    let ptr = rig.device.alloc_shared(64)?;
    rig.device.write(ptr, &[0xFF; 64])?;
    let pattern = [1u8, 2, 3, 4, 5, 6, 7, 8];

    let cb = rig.buffer(CommandBufferDesc::default());
    let sp = cb.append_usm_fill(ptr, &pattern, 64, &[])?;
    assert_eq!(sp.id(), 0);
    cb.finalize()?;
    cb.enqueue(&HostQueue::immediate(rig.device.clone()), &[])?;

    let expected: Vec<u8> = pattern.iter().copied().cycle().take(64).collect();
    assert_eq!(rig.device.read(ptr, 64)?, expected);
    Ok(())
}

#[test]
fn buffer_fill_respects_offset() -> anyhow::Result<()> {
    let rig = rig();
    let buf = ReferenceBuffer::new(&rig.device, 16)?;
    let cb = rig.buffer(CommandBufferDesc::default());
    cb.append_buffer_fill(&buf, &[0xAB, 0xCD], 4, 8, &[])?;
    cb.finalize()?;
    cb.enqueue(&HostQueue::immediate(rig.device.clone()), &[])?;
    assert_eq!(
        rig.device.read(buf.ptr(), 16)?,
        vec![0, 0, 0, 0, 0xAB, 0xCD, 0xAB, 0xCD, 0xAB, 0xCD, 0xAB, 0xCD, 0, 0, 0, 0]
    );
    Ok(())
}

#[test]
fn native_pattern_fill_on_wider_backend() -> anyhow::Result<()> {
    let device = ReferenceDevice::new(4096);
    let emitter = ReferenceEmitter::new(device.clone(), KernelRegistry::new())
        .with_max_native_pattern(16)
        .shared();
    let cb = ReferenceCommandBuffer::create(emitter.clone(), ContextHandle::create(), CommandBufferDesc::default())?;
    let ptr = device.alloc_device(32)?;

    // one node is enough
    emitter.faults().fail_emit_after(1);
    cb.append_usm_fill(ptr, &[3u8; 16], 32, &[])?;
    emitter.faults().clear();
    cb.finalize()?;
    cb.enqueue(&HostQueue::immediate(device.clone()), &[])?;
    assert_eq!(device.read(ptr, 32)?, vec![3u8; 32]);
    Ok(())
}
