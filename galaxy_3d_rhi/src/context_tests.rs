use std::sync::Mutex;

use super::*;
use crate::binding::ShaderReflection;
use crate::command_buffer::CommandBufferPool;
use crate::config::{DeviceCapabilities, RhiConfig};
use crate::payload::Payload;
use crate::scheduler::SubmissionScheduler;

/// Scheduler that keeps submitted payloads for inspection
#[derive(Default)]
struct RecordingScheduler {
    submitted: Mutex<Vec<Payload>>,
    pool: Arc<CommandBufferPool>,
}

impl RecordingScheduler {
    fn take(&self) -> Vec<Payload> {
        std::mem::take(&mut *self.submitted.lock().unwrap())
    }
}

impl SubmissionScheduler for RecordingScheduler {
    fn submit(&self, payloads: Vec<Payload>) -> Result<()> {
        self.submitted.lock().unwrap().extend(payloads);
        Ok(())
    }

    fn command_buffer_pool(&self) -> Arc<CommandBufferPool> {
        self.pool.clone()
    }
}

fn setup(config: RhiConfig) -> (Arc<Device>, Arc<RecordingScheduler>) {
    let scheduler = Arc::new(RecordingScheduler::default());
    let device = Device::new(DeviceCapabilities::default(), config, scheduler.clone()).unwrap();
    (device, scheduler)
}

fn pixel_shader() -> ShaderReflection {
    ShaderReflection::graphics()
        .with_stage(ShaderVisibility::Pixel, ShaderResourceCounts::new(1, 1, 0, 1))
        .with_root_constants()
}

fn bind_pixel_views(context: &mut CommandContext) {
    let stage = ShaderVisibility::Pixel;
    context
        .bind_view(stage, ResourceKind::ConstantBuffer, 0, Descriptor::constant_buffer(1, 0x100, 64))
        .unwrap();
    context
        .bind_view(stage, ResourceKind::ShaderResource, 0, Descriptor::shader_resource(2, 0))
        .unwrap();
    context
        .bind_view(stage, ResourceKind::Sampler, 0, Descriptor::sampler(3, 0))
        .unwrap();
}

fn commands(payload: &Payload) -> Vec<GpuCommand> {
    payload
        .command_buffers()
        .iter()
        .flat_map(|buffer| buffer.commands().iter().cloned())
        .collect()
}

#[test]
fn test_open_is_lazy_and_idempotent() {
    let (device, _) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    assert!(!context.is_open());
    assert!(context.session().is_none());

    context.open().unwrap();
    let session = context.session().unwrap().id();
    context.open().unwrap();
    assert_eq!(context.session().unwrap().id(), session);
    assert_eq!(context.stats().sessions, 1);
}

#[test]
fn test_close_signals_session_after_buffer() {
    let (device, scheduler) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    context.open().unwrap();
    let session = context.session().unwrap().clone();

    context.flush().unwrap();
    assert!(!context.is_open());

    let payloads = scheduler.take();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].command_buffers().len(), 1);
    assert!(payloads[0].command_buffers()[0].is_closed());
    assert_eq!(payloads[0].signals()[0].id(), session.id());
}

#[test]
fn test_flush_with_nothing_recorded_submits_nothing() {
    let (device, scheduler) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    context.flush().unwrap();
    assert!(scheduler.take().is_empty());
    assert_eq!(context.stats().submissions, 0);
}

#[test]
fn test_timestamps_bracket_barriers_and_work() {
    let (device, scheduler) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    context
        .transition(7, ResourceState::RenderTarget, ResourceState::ShaderResource)
        .unwrap();
    context.flush().unwrap();

    let recorded = commands(&scheduler.take()[0]);
    assert_eq!(
        recorded,
        vec![
            GpuCommand::BeginTimestamp,
            GpuCommand::ResourceBarriers(vec![ResourceBarrier::Transition {
                resource: 7,
                before: ResourceState::RenderTarget,
                after: ResourceState::ShaderResource,
            }]),
            GpuCommand::EndTimestamp,
        ]
    );
}

#[test]
fn test_no_timestamps_when_disabled() {
    let (device, scheduler) = setup(RhiConfig {
        emit_timestamps: false,
        ..RhiConfig::default()
    });
    let mut context = device.create_context(QueueType::Direct).unwrap();
    context.begin_event("shadows").unwrap();
    context.flush().unwrap();

    // The dangling event is closed with the buffer
    assert_eq!(
        commands(&scheduler.take()[0]),
        vec![GpuCommand::BeginEvent("shadows".to_string()), GpuCommand::EndEvent]
    );
}

#[test]
fn test_same_state_transition_is_dropped() {
    let (device, _) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    context
        .transition(1, ResourceState::CopyDest, ResourceState::CopyDest)
        .unwrap();
    context.close().unwrap();
    assert_eq!(context.stats().barriers, 0);
}

#[test]
fn test_draw_rebuilds_tables_and_root_constants_once() {
    let (device, scheduler) = setup(RhiConfig {
        emit_timestamps: false,
        ..RhiConfig::default()
    });
    let mut context = device.create_context(QueueType::Direct).unwrap();
    let state = device.bound_shader_state(&pixel_shader()).unwrap();
    let layout = state.layout().clone();
    context.set_shader_state(state).unwrap();
    bind_pixel_views(&mut context);
    context.set_root_constants([1, 2, 3, 4]);

    context.draw(3, 1, 0, 0).unwrap();
    context.draw(3, 1, 0, 0).unwrap();
    context.flush().unwrap();

    let recorded = commands(&scheduler.take()[0]);
    let tables = recorded
        .iter()
        .filter(|c| matches!(c, GpuCommand::SetDescriptorTable { .. }))
        .count();
    let constants: Vec<&GpuCommand> = recorded
        .iter()
        .filter(|c| matches!(c, GpuCommand::SetRootConstants { .. }))
        .collect();
    assert_eq!(tables, 2);
    assert_eq!(
        constants,
        vec![&GpuCommand::SetRootConstants {
            root_index: layout.root_constants_slot().unwrap().root_index,
            values: [1, 2, 3, 4],
        }]
    );
    assert_eq!(context.stats().draws, 2);
}

#[test]
fn test_missing_binding_records_nothing() {
    let (device, _) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    context
        .set_shader_state(device.bound_shader_state(&pixel_shader()).unwrap())
        .unwrap();
    context
        .bind_view(ShaderVisibility::Pixel, ResourceKind::ConstantBuffer, 0, Descriptor::constant_buffer(1, 0x100, 64))
        .unwrap();

    let before = context.command_buffer().unwrap().len();
    let result = context.draw(3, 1, 0, 0);
    assert_eq!(
        result,
        Err(Error::MissingBinding {
            stage: ShaderVisibility::Pixel,
            kind: ResourceKind::ShaderResource,
            slot: 0,
        })
    );
    assert_eq!(context.command_buffer().unwrap().len(), before);
    assert_eq!(context.stats().draws, 0);
}

#[test]
fn test_draw_without_shader_state_is_invalid() {
    let (device, _) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    assert!(matches!(context.draw(3, 1, 0, 0), Err(Error::InvalidState(_))));
}

#[test]
fn test_queue_capabilities_enforced() {
    let (device, _) = setup(RhiConfig::default());
    let compute = ShaderReflection::compute(ShaderResourceCounts::default());

    let mut context = device.create_context(QueueType::Compute).unwrap();
    context
        .set_shader_state(device.bound_shader_state(&compute).unwrap())
        .unwrap();
    assert!(context.dispatch(1, 1, 1).is_ok());
    assert!(context.draw(3, 1, 0, 0).is_err());

    let mut copy = device.create_context(QueueType::Copy).unwrap();
    copy.set_shader_state(device.bound_shader_state(&compute).unwrap())
        .unwrap();
    assert!(copy.dispatch(1, 1, 1).is_err());
}

#[test]
fn test_conditional_split_at_threshold() {
    let (device, scheduler) = setup(RhiConfig {
        max_commands_per_command_buffer: 2,
        ..RhiConfig::default()
    });
    let compute = ShaderReflection::compute(ShaderResourceCounts::default());
    let mut context = device.create_context(QueueType::Compute).unwrap();
    context
        .set_shader_state(device.bound_shader_state(&compute).unwrap())
        .unwrap();

    for _ in 0..5 {
        context.dispatch(8, 8, 1).unwrap();
    }
    context.flush().unwrap();

    let payloads = scheduler.take();
    let per_buffer: Vec<u32> = payloads
        .iter()
        .flat_map(|p| p.command_buffers().iter().map(|b| b.work_count()))
        .collect();
    assert_eq!(per_buffer, vec![2, 2, 1]);
    assert_eq!(context.stats().splits, 2);
    // Every split session is its own payload with its own sync point
    assert!(payloads.iter().all(|p| p.signals().len() == 1));
}

#[test]
fn test_signal_closes_and_rejects_second_signal() {
    let (device, scheduler) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    let fence = SyncPoint::create(SyncPointKind::GpuAndCpu);

    context.open().unwrap();
    context.signal_sync_point(&fence).unwrap();
    assert!(!context.is_open());
    assert!(context.signal_sync_point(&fence).is_err());

    context.flush().unwrap();
    let payloads = scheduler.take();
    let signals: Vec<_> = payloads[0].signals().iter().map(|s| s.id()).collect();
    assert_eq!(signals.len(), 2);
    assert_eq!(signals[1], fence.id());
}

#[test]
fn test_wait_goes_before_following_work() {
    let (device, scheduler) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    let upload = SyncPoint::create(SyncPointKind::GpuOnly);

    context.begin_event("before").unwrap();
    context.wait_sync_point(&upload).unwrap();
    context.begin_event("after").unwrap();
    context.flush().unwrap();

    let payloads = scheduler.take();
    assert_eq!(payloads.len(), 2);
    assert!(payloads[0].waits().is_empty());
    assert_eq!(payloads[1].waits()[0].id(), upload.id());
    assert!(commands(&payloads[1]).contains(&GpuCommand::BeginEvent("after".to_string())));
}

#[test]
fn test_wait_on_complete_sync_point_is_elided() {
    let (device, scheduler) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    let done = SyncPoint::create(SyncPointKind::GpuOnly);
    done.complete();

    context.begin_event("before").unwrap();
    context.wait_sync_point(&done).unwrap();
    assert_eq!(context.stats().elided_waits, 1);
    assert_eq!(context.stats().waits, 0);

    // The session still ends at the wait, without a wait attached
    assert!(!context.is_open());
    assert_eq!(context.pending_payloads(), 1);
    context.begin_event("after").unwrap();
    context.flush().unwrap();

    let payloads = scheduler.take();
    assert_eq!(payloads.len(), 2);
    assert!(payloads.iter().all(|p| p.waits().is_empty()));
    assert!(commands(&payloads[0]).contains(&GpuCommand::BeginEvent("before".to_string())));
    assert!(commands(&payloads[1]).contains(&GpuCommand::BeginEvent("after".to_string())));
}

#[test]
fn test_wait_on_failed_sync_point_reports_failure() {
    let (device, _) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    let hung = SyncPoint::create(SyncPointKind::GpuOnly);
    hung.fail(Error::GpuTimeout { sync_point: hung.id() });

    assert_eq!(
        context.wait_sync_point(&hung),
        Err(Error::GpuTimeout { sync_point: hung.id() })
    );
}

#[test]
fn test_completion_callback_joins_payload() {
    let (device, scheduler) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    context.open().unwrap();
    context.on_completion(Box::new(|| {})).unwrap();
    context.flush().unwrap();

    let payloads = scheduler.take();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].callback_count(), 1);
}

#[test]
fn test_drop_flushes_open_session() {
    let (device, scheduler) = setup(RhiConfig::default());
    {
        let mut context = device.create_context(QueueType::Direct).unwrap();
        context.begin_event("frame").unwrap();
    }
    assert_eq!(scheduler.take().len(), 1);
}

#[test]
fn test_record_binding_table_switches_layout() {
    let (device, _) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    let layout = device.binding_layout(&pixel_shader()).unwrap();
    bind_pixel_views(&mut context);

    let written = context
        .record_binding_table(ShaderVisibility::Pixel, &layout)
        .unwrap();
    assert_eq!(written, 2);
    assert!(Arc::ptr_eq(context.shader_state().unwrap().layout(), &layout));
    assert!(context
        .command_buffer()
        .unwrap()
        .commands()
        .contains(&GpuCommand::SetBindingLayout(layout.id())));
}

#[test]
fn test_layout_without_counts_requires_every_slot() {
    let (device, _) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    let layout = device.binding_layout(&pixel_shader()).unwrap();
    context.set_binding_layout(&layout).unwrap();

    let before = context.command_buffer().unwrap().len();
    assert_eq!(
        context.draw(3, 1, 0, 0),
        Err(Error::MissingBinding {
            stage: ShaderVisibility::Pixel,
            kind: ResourceKind::ConstantBuffer,
            slot: 0,
        })
    );
    assert_eq!(context.command_buffer().unwrap().len(), before);
    assert!(!context
        .command_buffer()
        .unwrap()
        .commands()
        .iter()
        .any(|c| matches!(c, GpuCommand::SetDirectConstantBuffer { .. })));

    bind_pixel_views(&mut context);
    assert!(context.draw(3, 1, 0, 0).is_ok());
}

#[test]
fn test_record_binding_table_to_new_layout_still_checks_bindings() {
    let (device, _) = setup(RhiConfig::default());
    let mut context = device.create_context(QueueType::Direct).unwrap();
    context
        .set_shader_state(device.bound_shader_state(&pixel_shader()).unwrap())
        .unwrap();
    context
        .bind_view(ShaderVisibility::Pixel, ResourceKind::ConstantBuffer, 0, Descriptor::constant_buffer(1, 0x100, 64))
        .unwrap();

    let textures = ShaderReflection::graphics()
        .with_stage(ShaderVisibility::Pixel, ShaderResourceCounts::new(0, 2, 0, 0));
    let other = device.binding_layout(&textures).unwrap();
    let missing = Error::MissingBinding {
        stage: ShaderVisibility::Pixel,
        kind: ResourceKind::ShaderResource,
        slot: 0,
    };

    assert_eq!(
        context.record_binding_table(ShaderVisibility::Pixel, &other),
        Err(missing.clone())
    );
    assert!(Arc::ptr_eq(context.shader_state().unwrap().layout(), &other));
    assert_eq!(context.draw(3, 1, 0, 0), Err(missing));
    assert_eq!(context.stats().draws, 0);
}

#[test]
fn test_rebinding_current_layout_keeps_declared_counts() {
    let caps = DeviceCapabilities {
        resource_binding_tier: crate::config::ResourceBindingTier::Tier1,
        ..DeviceCapabilities::default()
    };
    let scheduler = Arc::new(RecordingScheduler::default());
    let device = Device::new(caps, RhiConfig::default(), scheduler).unwrap();
    let mut context = device.create_context(QueueType::Direct).unwrap();

    // Five declared views widen to a table of eight
    let shader = ShaderReflection::graphics()
        .with_stage(ShaderVisibility::Pixel, ShaderResourceCounts::new(0, 5, 0, 0));
    let state = device.bound_shader_state(&shader).unwrap();
    let layout = state.layout().clone();
    assert_eq!(layout.table_length(ShaderVisibility::Pixel, ResourceKind::ShaderResource), 8);
    context.set_shader_state(state).unwrap();
    for slot in 0..5 {
        context
            .bind_view(ShaderVisibility::Pixel, ResourceKind::ShaderResource, slot, Descriptor::shader_resource(slot as u64, 0))
            .unwrap();
    }

    context.set_binding_layout(&layout).unwrap();
    assert_eq!(context.record_binding_table(ShaderVisibility::Pixel, &layout).unwrap(), 1);
    assert!(context.draw(3, 1, 0, 0).is_ok());

    // A layout-only state of the same shape requires the widened slots
    let derived = BoundShaderState::from_layout(layout);
    assert_eq!(
        derived.first_missing(context.descriptors().views()),
        Some((ShaderVisibility::Pixel, ResourceKind::ShaderResource, 5))
    );
}
