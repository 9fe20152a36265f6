//! Integration tests: full link lifecycle, command ordering, workflows
//! and failure scenarios against the in-memory fake target.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dsplink_core::{
    CommandTask, ConnectionFlags, ConnectionState, DeviceResponse, DeviceStatus, FakeDevice,
    FakeTransport, FileStatus, Link, LinkConfig, LinkError, MAX_PAYLOAD_SIZE, Opcode, QueueError,
    WaitOutcome,
};
use parking_lot::Mutex;

// ── Helpers ──────────────────────────────────────────────────────

/// Config with no background traffic, so written frames are exactly
/// what the test queued.
fn quiet_config() -> LinkConfig {
    let mut config = LinkConfig::default();
    config.transport.port = "fake0".into();
    config.queue.probe_on_connect = false;
    config.heartbeat.interval_ms = 0;
    config
}

fn link_with(config: LinkConfig) -> (Link, FakeDevice) {
    let device = FakeDevice::new();
    let link = Link::new(FakeTransport::new(device.clone()), config);
    (link, device)
}

fn connected() -> (Link, FakeDevice) {
    let (link, device) = link_with(quiet_config());
    link.connect().unwrap();
    (link, device)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn record<T: Clone + Send + 'static>(
    channel: &dsplink_core::EventChannel<T>,
) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    channel.subscribe(move |value: &T| sink.lock().push(value.clone()));
    seen
}

// ── Connection lifecycle ─────────────────────────────────────────

#[test]
fn test_lifecycle_broadcasts() {
    let (link, device) = link_with(quiet_config());
    let states = record(&link.events().connection);

    link.connect().unwrap();
    assert!(link.is_connected());
    assert_eq!(device.open_port().as_deref(), Some("fake0"));

    link.disconnect();
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(device.open_port(), None);

    // A second disconnect still tells listeners.
    link.disconnect();

    assert_eq!(
        states.lock().as_slice(),
        &[
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Disconnected,
        ]
    );
}

#[test]
fn test_connect_is_idempotent() {
    let (link, device) = connected();
    link.connect().unwrap();
    assert_eq!(device.open_count(), 1);
}

#[test]
fn test_connect_without_port() {
    let mut config = quiet_config();
    config.transport.port.clear();
    let (link, _device) = link_with(config);

    assert!(matches!(link.connect(), Err(LinkError::NoPortSelected)));
    assert_eq!(link.state(), ConnectionState::Disconnected);

    assert!(link.select_port("fake1"));
    link.connect().unwrap();
    assert!(link.is_connected());
}

#[test]
fn test_select_port_ignored_while_connected() {
    let (link, device) = connected();
    assert!(!link.select_port("other"));
    assert_eq!(link.selected_port().as_deref(), Some("fake0"));

    link.disconnect();
    assert!(link.select_port("other"));
    link.connect().unwrap();
    assert_eq!(device.open_port().as_deref(), Some("other"));
}

#[test]
fn test_open_failure_leaves_link_usable() {
    let (link, device) = link_with(quiet_config());
    device.set_fail_open(true);

    assert!(matches!(link.connect(), Err(LinkError::Transport(_))));
    assert_eq!(link.state(), ConnectionState::Disconnected);
    assert_eq!(link.transmit_ping(), Err(QueueError::NotConnected));

    device.set_fail_open(false);
    link.connect().unwrap();
    assert!(link.is_connected());
}

#[test]
fn test_transmit_while_disconnected() {
    let (link, _device) = link_with(quiet_config());
    assert_eq!(link.transmit_ping(), Err(QueueError::NotConnected));
    assert_eq!(link.transmit_midi(0x90, 60, 100), Err(QueueError::NotConnected));
    assert!(matches!(
        link.firmware_version(),
        Err(LinkError::Queue(QueueError::NotConnected))
    ));
}

// ── Dispatch ordering and back-pressure ──────────────────────────

#[test]
fn test_storage_commands_keep_order_under_back_pressure() {
    let mut config = quiet_config();
    config.queue.capacity = 4;
    config.queue.enqueue_timeout_ms = 10;
    let (link, device) = link_with(config);
    device.set_write_delay(Duration::from_millis(100));
    link.connect().unwrap();

    link.transmit_create_file("/take.wav", 8, None).unwrap();
    link.transmit_append_file(vec![1u8, 2, 3, 4]).unwrap();
    link.transmit_append_file(vec![5u8, 6, 7, 8]).unwrap();
    link.transmit_close_file("/take.wav", None).unwrap();

    // The dispatcher is stuck writing the first command; three are queued.
    thread::sleep(Duration::from_millis(20));
    let first = link.transmit_ping();
    let second = link.transmit_ping();
    assert!(
        first == Err(QueueError::QueueFull) || second == Err(QueueError::QueueFull),
        "expected a full queue, got {first:?} / {second:?}"
    );

    assert!(wait_until(|| device.written_tasks().len() >= 4));
    let written = device.written_tasks();
    assert_eq!(
        &written[..4],
        &[
            CommandTask::CreateFile {
                path: "/take.wav".into(),
                size: 8,
                timestamp: None,
            },
            CommandTask::AppendFile {
                data: vec![1u8, 2, 3, 4].into()
            },
            CommandTask::AppendFile {
                data: vec![5u8, 6, 7, 8].into()
            },
            CommandTask::CloseFile {
                path: "/take.wav".into(),
                timestamp: None,
            },
        ]
    );

    assert!(wait_until(|| device.file("/take.wav").is_some()));
    assert_eq!(device.file("/take.wav").unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
}

#[test]
fn test_midi_bytes_are_sent_verbatim() {
    let (link, device) = connected();
    link.transmit_midi(0x90, 60, 127).unwrap();

    assert!(wait_until(|| !device.written_frames().is_empty()));
    let frames = device.written_frames();
    assert_eq!(frames[0].opcode().unwrap(), Opcode::Midi);
    assert_eq!(frames[0].payload(), &[0x90u8, 60, 127]);
}

#[test]
fn test_flash_write_holds_the_queue() {
    let mut config = quiet_config();
    config.queue.flash_timeout_ms = 300;
    let (link, device) = link_with(config);
    device.silence(Opcode::CopyToFlash);
    link.connect().unwrap();

    link.transmit_copy_to_flash().unwrap();
    link.transmit_ping().unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(device.written_tasks(), vec![CommandTask::CopyToFlash]);

    // Without an ack the dispatcher gives up and moves on.
    assert!(wait_until(|| device.written_tasks().len() == 2));
    assert!(link.is_connected());
}

#[test]
fn test_disconnect_interrupts_flash_hold() {
    let (link, device) = link_with(quiet_config());
    device.silence(Opcode::CopyToFlash);
    link.connect().unwrap();

    link.transmit_copy_to_flash().unwrap();
    assert!(wait_until(|| !device.written_tasks().is_empty()));

    let started = Instant::now();
    link.disconnect();
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "disconnect took {:?}",
        started.elapsed()
    );
    assert_eq!(link.state(), ConnectionState::Disconnected);

    // The next session holds for its barrier again.
    link.connect().unwrap();
    link.transmit_copy_to_flash().unwrap();
    link.transmit_ping().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(
        device.written_tasks(),
        vec![CommandTask::CopyToFlash, CommandTask::CopyToFlash]
    );
}

#[test]
fn test_oversized_payload_is_rejected() {
    let (link, device) = connected();
    let too_big = vec![0u8; MAX_PAYLOAD_SIZE + 1];

    assert_eq!(
        link.transmit_append_file(too_big.clone()),
        Err(QueueError::PayloadTooLarge {
            size: MAX_PAYLOAD_SIZE + 1,
            max: MAX_PAYLOAD_SIZE,
        })
    );
    assert!(matches!(
        link.transmit_updated_preset(too_big),
        Err(QueueError::PayloadTooLarge { .. })
    ));
    assert!(matches!(
        link.upload_fragment(&vec![0u8; MAX_PAYLOAD_SIZE], 0),
        Err(QueueError::PayloadTooLarge { .. })
    ));

    // The link is unaffected and nothing reached the wire.
    link.transmit_ping().unwrap();
    assert!(wait_until(|| !device.written_tasks().is_empty()));
    assert_eq!(device.written_tasks(), vec![CommandTask::Ping]);
    assert!(link.is_connected());
}

// ── Gates ────────────────────────────────────────────────────────

#[test]
fn test_write_gate_released_by_ack() {
    let (link, _device) = connected();
    link.clear_sync();
    link.transmit_start().unwrap();
    assert!(link.wait_sync(Some(Duration::from_secs(2))));
}

#[test]
fn test_gate_times_out_without_reply() {
    let (link, device) = connected();
    device.silence(Opcode::MemoryRead);
    link.clear_read_sync();
    link.transmit_memory_read(0, 4).unwrap();
    assert_eq!(
        link.wait_read_sync_outcome(Some(Duration::from_millis(50))),
        WaitOutcome::TimedOut
    );
}

#[test]
fn test_disconnect_wakes_indefinite_waiter() {
    let (link, device) = connected();
    device.set_auto_reply(false);
    let link = Arc::new(link);

    let waiter = {
        let link = link.clone();
        thread::spawn(move || {
            link.clear_read_sync();
            link.transmit_memory_read(0x100, 16).unwrap();
            link.wait_read_sync_outcome(None)
        })
    };

    assert!(wait_until(|| !device.written_frames().is_empty()));
    link.disconnect();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Aborted);
}

// ── Status events ────────────────────────────────────────────────

#[test]
fn test_probe_publishes_storage() {
    let mut config = quiet_config();
    config.queue.probe_on_connect = true;
    let (link, _device) = link_with(config);
    let storage = record(&link.events().storage);

    link.connect().unwrap();
    assert!(wait_until(|| link.sd_card_present()));
    assert!(wait_until(|| storage.lock().len() == 2));

    link.disconnect();
    assert_eq!(storage.lock().as_slice(), &[false, true, false]);
}

#[test]
fn test_unsolicited_status_updates_flags() {
    let (link, device) = connected();
    let flags = record(&link.events().flags);

    device.inject(&DeviceResponse::Status(DeviceStatus {
        flags: (ConnectionFlags::DSP_RUNNING | ConnectionFlags::PATCH_LOADED).bits(),
        storage_present: false,
        dsp_load_percent: 42,
    }));

    assert!(wait_until(|| link.dsp_load_percent() == 42));
    assert!(link.connection_flags().contains(ConnectionFlags::PATCH_LOADED));
    assert_eq!(flags.lock().len(), 2);
    assert!(flags.lock()[1].contains(ConnectionFlags::DSP_RUNNING));
}

#[test]
fn test_ping_device_reports_status() {
    let (link, device) = connected();
    device.set_status(DeviceStatus {
        flags: ConnectionFlags::DSP_RUNNING.bits(),
        storage_present: true,
        dsp_load_percent: 7,
    });

    let status = link.ping_device().unwrap();
    assert!(status.storage_present);
    assert_eq!(status.dsp_load_percent, 7);
    assert!(status.connection_flags().contains(ConnectionFlags::DSP_RUNNING));
}

// ── Failure and target-initiated disconnect ──────────────────────

#[test]
fn test_io_failure_faults_until_disconnect() {
    let (link, device) = connected();
    let states = record(&link.events().connection);

    device.set_fail_io(true);
    assert!(wait_until(|| link.state() == ConnectionState::Faulted));
    assert!(matches!(link.connect(), Err(LinkError::Faulted)));
    assert_eq!(link.transmit_ping(), Err(QueueError::NotConnected));

    link.disconnect();
    device.set_fail_io(false);
    link.connect().unwrap();
    assert!(link.is_connected());

    assert_eq!(
        states.lock().as_slice(),
        &[
            ConnectionState::Connected,
            ConnectionState::Faulted,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[test]
fn test_dfu_disconnects_link() {
    let (link, device) = connected();
    link.transmit_bring_to_dfu().unwrap();

    assert!(wait_until(|| link.state() == ConnectionState::Disconnected));
    assert_eq!(device.written_tasks(), vec![CommandTask::BringToDfu]);
    assert_eq!(link.transmit_ping(), Err(QueueError::NotConnected));

    // The transport comes back to the link and can be reopened.
    link.connect().unwrap();
    assert_eq!(device.open_count(), 2);
}

// ── Workflows ────────────────────────────────────────────────────

#[test]
fn test_upload_file_in_chunks() {
    let (link, device) = connected();
    let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
    let stamp = chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
        .unwrap()
        .and_hms_opt(14, 30, 10)
        .unwrap();

    link.upload_file("/loops/a.raw", &data, Some(stamp)).unwrap();

    assert_eq!(device.file("/loops/a.raw").unwrap(), data);
    assert_eq!(device.file_timestamp("/loops/a.raw"), Some(stamp));
    let appends = device
        .written_tasks()
        .iter()
        .filter(|t| t.opcode() == Opcode::AppendFile)
        .count();
    assert_eq!(appends, 3);
}

#[test]
fn test_file_list_and_directories() {
    let (link, device) = connected();
    device.add_file("/a.wav", &[0; 10], None);
    device.add_file("/b.txt", b"hello", None);

    link.create_directory("/presets", None).unwrap();
    let err = link.create_directory("/presets", None).unwrap_err();
    assert!(matches!(
        err,
        LinkError::FileOperation {
            status: FileStatus::Exists,
            ..
        }
    ));

    let root = link.file_list(None).unwrap();
    let names: Vec<&str> = root.iter().map(|e| e.pure_name()).collect();
    assert_eq!(names, vec!["a.wav", "b.txt", "presets"]);
    assert_eq!(root[0].size_bytes(), 10);
    assert!(root[2].is_directory());

    assert!(link.file_list(Some("/presets")).unwrap().is_empty());
    assert!(matches!(
        link.file_list(Some("/missing")),
        Err(LinkError::FileOperation {
            status: FileStatus::NotFound,
            ..
        })
    ));
}

#[test]
fn test_file_info_and_delete() {
    let (link, device) = connected();
    device.add_file("/kick.wav", &[1, 2, 3], None);

    let info = link.file_info("/kick.wav").unwrap().unwrap();
    assert_eq!(info.size_bytes(), 3);
    assert_eq!(info.extension(), "wav");

    link.delete_file("/kick.wav").unwrap();
    assert!(link.file_info("/kick.wav").unwrap().is_none());
    assert!(matches!(
        link.delete_file("/kick.wav"),
        Err(LinkError::FileOperation {
            status: FileStatus::NotFound,
            ..
        })
    ));
}

#[test]
fn test_memory_reads() {
    let (link, device) = connected();
    device.poke(0x100, &[1, 2, 3, 4, 5]);

    assert_eq!(&link.read_memory(0x100, 5).unwrap()[..], &[1u8, 2, 3, 4, 5]);
    assert_eq!(link.read_word(0x100).unwrap(), 0x0403_0201);
    assert_eq!(link.memory_buffer().0, 0x100);
}

#[test]
fn test_patch_upload_lands_at_patch_base() {
    let mut config = quiet_config();
    config.target.chunk_size = 64;
    let (link, device) = link_with(config);
    link.connect().unwrap();

    let image: Vec<u8> = (0..200u8).collect();
    link.upload_patch(&image).unwrap();

    let base = link.target_profile().patch_base_address;
    assert_eq!(device.peek(base, 200), image);

    let too_big = vec![0u8; link.target_profile().patch_max_size as usize + 1];
    assert!(matches!(
        link.upload_patch(&too_big),
        Err(LinkError::PayloadTooLarge { .. })
    ));
}

#[test]
fn test_firmware_version_updates_profile() {
    let (link, _device) = connected();
    let version = link.firmware_version().unwrap();
    assert_eq!((version.major, version.minor, version.patch), (1, 0, 12));
    assert_eq!(link.target_profile().firmware, Some(version));
}

#[test]
fn test_workflow_times_out() {
    let mut config = quiet_config();
    config.queue.response_timeout_ms = 50;
    let (link, device) = link_with(config);
    device.silence(Opcode::GetFwVersion);
    link.connect().unwrap();

    assert!(matches!(
        link.firmware_version(),
        Err(LinkError::ResponseTimeout(_))
    ));
}

#[test]
fn test_request_ack_for_presets() {
    let (link, device) = connected();
    link.request_ack(CommandTask::RecallPreset { index: 3 }).unwrap();
    assert_eq!(
        device.written_tasks(),
        vec![CommandTask::RecallPreset { index: 3 }]
    );
}
