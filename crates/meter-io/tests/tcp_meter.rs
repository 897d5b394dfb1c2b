use meter_core::{
    AcquisitionLoop, CycleOutcome, Device, DeviceError, LoopConfig, Sample, TimeBase,
};
use meter_io::{MeterMessage, TcpMeter, TcpMeterConfig};
use std::io::Write;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

fn serve(lines: Vec<String>, hold_open: Duration) -> (String, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept meter client");
        for line in lines {
            stream.write_all(line.as_bytes()).unwrap();
        }
        stream.flush().unwrap();
        thread::sleep(hold_open);
    });
    (addr, handle)
}

fn connect(addr: String) -> TcpMeter {
    let config = TcpMeterConfig {
        addr,
        read_timeout: Duration::from_millis(20),
        ..Default::default()
    };
    TcpMeter::connect(&config, TimeBase::new()).expect("connect to test server")
}

/// Read until something other than a timeout comes back.
fn next_event(meter: &mut TcpMeter) -> Result<Option<Sample>, DeviceError> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match meter.read() {
            Ok(None) if Instant::now() < deadline => continue,
            other => return other,
        }
    }
}

#[test]
fn reads_samples_idle_and_faults_in_order() {
    let lines = vec![
        MeterMessage::Reading {
            timestamp_us: Some(10),
            value: 0.5,
        }
        .to_line(),
        MeterMessage::Fault {
            message: "saturated".into(),
        }
        .to_line(),
        MeterMessage::Reading {
            timestamp_us: Some(30),
            value: 0.7,
        }
        .to_line(),
    ];
    let (addr, server) = serve(lines, Duration::from_millis(200));
    let mut meter = connect(addr);

    assert_eq!(next_event(&mut meter).unwrap(), Some(Sample::new(10, 0.5)));
    assert!(matches!(next_event(&mut meter), Err(DeviceError::Fault(m)) if m == "saturated"));
    assert_eq!(next_event(&mut meter).unwrap(), Some(Sample::new(30, 0.7)));

    meter.close().unwrap();
    assert!(matches!(meter.close(), Err(DeviceError::AlreadyClosed)));
    server.join().unwrap();
}

#[test]
fn read_timeout_yields_none() {
    let (addr, server) = serve(vec![], Duration::from_millis(300));
    let mut meter = connect(addr);

    let started = Instant::now();
    assert_eq!(meter.read().unwrap(), None);
    assert!(started.elapsed() < Duration::from_secs(2));

    meter.close().unwrap();
    server.join().unwrap();
}

#[test]
fn malformed_line_is_reported_and_stream_continues() {
    let lines = vec![
        "{\"type\":\"bogus\"}\n".to_string(),
        MeterMessage::Reading {
            timestamp_us: Some(5),
            value: 2.0,
        }
        .to_line(),
    ];
    let (addr, server) = serve(lines, Duration::from_millis(200));
    let mut meter = connect(addr);

    assert!(matches!(
        next_event(&mut meter),
        Err(DeviceError::Malformed(_))
    ));
    assert_eq!(next_event(&mut meter).unwrap(), Some(Sample::new(5, 2.0)));
    meter.close().unwrap();
    server.join().unwrap();
}

#[test]
fn server_hangup_is_disconnect() {
    let (addr, server) = serve(vec![], Duration::ZERO);
    let mut meter = connect(addr);
    server.join().unwrap();

    assert!(matches!(
        next_event(&mut meter),
        Err(DeviceError::Disconnected)
    ));
    meter.close().unwrap();
}

#[test]
fn connect_failure_is_reported() {
    // Bind then drop to get a port with nothing listening.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let config = TcpMeterConfig {
        addr,
        connect_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    assert!(TcpMeter::connect(&config, TimeBase::new()).is_err());
}

#[test]
fn drives_acquisition_loop() {
    let lines = (1..=4)
        .map(|i| {
            MeterMessage::Reading {
                timestamp_us: Some(i * 100),
                value: i as f64,
            }
            .to_line()
        })
        .collect();
    let (addr, server) = serve(lines, Duration::from_millis(300));
    let meter = connect(addr);
    let cfg = LoopConfig {
        capacity: 3,
        interval: Duration::ZERO,
    };
    let mut acq = AcquisitionLoop::new(meter, (), cfg).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while acq.stats().samples_acquired < 4 && Instant::now() < deadline {
        assert!(matches!(acq.cycle(), CycleOutcome::Completed(_)));
    }
    let values: Vec<f64> = acq.history().values().collect();
    assert_eq!(values, vec![2.0, 3.0, 4.0]);

    acq.stop_handle().stop();
    match acq.cycle() {
        CycleOutcome::Closed(report) => assert!(report.is_clean()),
        other => panic!("expected close, got {other:?}"),
    }
    server.join().unwrap();
}
