use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener},
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use indigo_client::IndigoClient;
use indigo_protocol::{
    BlobMode, Item, ItemValue, NumberValue, ParseError, ParserOptions, Property, PropertyKind,
    PropertyState, Version,
};
use indigo_server::{connection::Outcome, server::Builder};
use indigo_tests::{CCD, Event, MOUNT, Recorder, Simulator};

const TIMEOUT: Duration = Duration::from_secs(10);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn start_server(image_size: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Builder::new()
        .buffer_size(16 * 1024)
        .build(Simulator::new(image_size));
    thread::spawn(move || server.serve(listener));
    addr
}

struct Session {
    client: Arc<IndigoClient>,
    events: mpsc::Receiver<Event>,
    handle: thread::JoinHandle<Outcome>,
}

impl Session {
    fn start(client: IndigoClient, switch: Option<Version>) -> Session {
        let client = Arc::new(client);
        let (recorder, events) = Recorder::new(switch);
        let runner = Arc::clone(&client);
        let handle = thread::spawn(move || runner.run(Arc::new(recorder)).unwrap());
        Session {
            client,
            events,
            handle,
        }
    }

    fn next(&self) -> Event {
        self.events.recv_timeout(TIMEOUT).expect("No event in time")
    }

    fn definitions(&self, count: usize) -> Vec<Arc<Property>> {
        (0..count)
            .map(|_| match self.next() {
                Event::Defined(property) => property,
                other => panic!("Expected a definition, got {:?}", other),
            })
            .collect()
    }

    fn next_update(&self, name: &str) -> Arc<Property> {
        loop {
            match self.next() {
                Event::Updated(property) if property.name == name => return property,
                Event::Updated(_) => continue,
                other => panic!("Expected an update of {}, got {:?}", name, other),
            }
        }
    }

    /// Ends the session and returns the remaining events.
    fn finish(self) -> (Outcome, Vec<Event>) {
        self.client.shutdown().unwrap();
        let outcome = self.handle.join().unwrap();
        (outcome, self.events.iter().collect())
    }
}

fn number(property: &Property, item: &str) -> NumberValue {
    property
        .item(item)
        .and_then(|item| item.number())
        .cloned()
        .unwrap()
}

fn change(kind: PropertyKind, device: &str, name: &str, items: Vec<Item>) -> Property {
    let mut property = Property::new(kind, device, name);
    property.items = items;
    property
}

#[test]
fn mirrors_properties_and_changes() {
    init_logger();
    let addr = start_server(0);
    let session = Session::start(IndigoClient::connect(addr).unwrap(), None);

    let definitions = session.definitions(5);
    let coordinates = &definitions[0];
    assert_eq!(coordinates.device, MOUNT);
    assert_eq!(coordinates.state, PropertyState::Ok);
    let ra = number(coordinates, "RA");
    assert_eq!((ra.value, ra.min, ra.max), (12.5, Some(0.0), Some(24.0)));
    let model = definitions[1].item("MODEL").and_then(|item| item.text()).unwrap();
    assert_eq!(model.as_str(), "Simulator <v2>");

    let request = change(
        PropertyKind::Number,
        MOUNT,
        "EQUATORIAL_COORDINATES",
        vec![Item::new("RA", ItemValue::Number(NumberValue::new(13.0)))],
    );
    session.client.change_property(request).unwrap();
    let coordinates = session.next_update("EQUATORIAL_COORDINATES");
    let ra = number(&coordinates, "RA");
    assert_eq!((ra.value, ra.min, ra.max), (13.0, Some(0.0), Some(24.0)));
    assert_eq!(number(&coordinates, "DEC").value, 45.0);

    let request = change(
        PropertyKind::Switch,
        CCD,
        "CCD_FRAME_TYPE",
        vec![Item::new("DARK", ItemValue::Switch(true))],
    );
    session.client.change_property(request).unwrap();
    let frame = session.next_update("CCD_FRAME_TYPE");
    let switches: Vec<_> = frame.items.iter().map(|item| item.switch()).collect();
    assert_eq!(switches, [Some(false), Some(true)]);

    let (outcome, events) = session.finish();
    assert!(matches!(outcome, Outcome::Closed));
    let deleted: Vec<_> = events
        .into_iter()
        .filter_map(|event| match event {
            Event::Deleted { device, name } => Some((device, name)),
            _ => None,
        })
        .collect();
    assert_eq!(
        deleted,
        [(CCD.to_string(), None), (MOUNT.to_string(), None)]
    );
}

fn capture_image(switch: Option<Version>) -> Vec<u8> {
    let addr = start_server(100_003);
    let options = ParserOptions {
        buffer_size: 4096,
        ..Default::default()
    };
    let client = IndigoClient::connect(addr).unwrap().with_options(options);
    let session = Session::start(client, switch);
    session.definitions(5);
    assert_eq!(session.client.peer().version(), switch.unwrap_or(Version::LEGACY));

    session.client.enable_blob(CCD, None, BlobMode::Also).unwrap();
    let request = change(
        PropertyKind::Number,
        CCD,
        "CCD_EXPOSURE",
        vec![Item::new("EXPOSURE", ItemValue::Number(NumberValue::new(1.0)))],
    );
    session.client.change_property(request).unwrap();
    let image = session.next_update("CCD_IMAGE");
    let blob = image.item("IMAGE").and_then(|item| item.blob()).unwrap();
    assert_eq!(blob.format, ".fits");
    assert_eq!(blob.size, 100_003);
    let data = blob.data.clone().unwrap();
    session.finish();
    data
}

#[test]
fn blob_transfer_in_both_versions() {
    init_logger();
    let expected = Simulator::new(100_003).image();
    let scanned = capture_image(None);
    let bulk = capture_image(Some(Version::V2_0));
    assert!(scanned == expected);
    assert!(bulk == scanned);
}

#[test]
fn blobs_are_withheld_until_enabled() {
    init_logger();
    let addr = start_server(1024);
    let session = Session::start(IndigoClient::connect(addr).unwrap(), Some(Version::V2_0));
    session.definitions(5);

    let exposure = change(
        PropertyKind::Number,
        CCD,
        "CCD_EXPOSURE",
        vec![Item::new("EXPOSURE", ItemValue::Number(NumberValue::new(1.0)))],
    );
    let frame = change(
        PropertyKind::Switch,
        CCD,
        "CCD_FRAME_TYPE",
        vec![Item::new("LIGHT", ItemValue::Switch(true))],
    );
    session.client.change_property(exposure).unwrap();
    session.client.change_property(frame).unwrap();
    let names: Vec<_> = (0..2)
        .map(|_| match session.next() {
            Event::Updated(property) => property.name.clone(),
            other => panic!("Expected an update, got {:?}", other),
        })
        .collect();
    assert_eq!(names, ["CCD_EXPOSURE", "CCD_FRAME_TYPE"]);
    session.finish();
}

/// Accepts one connection, writes `script` and waits for the client to hang up.
fn fake_server(script: Vec<String>, gate: mpsc::Receiver<()>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut tcp, _) = listener.accept().unwrap();
        for part in script {
            tcp.write_all(part.as_bytes()).unwrap();
            if gate.recv().is_err() {
                break;
            }
        }
        let mut rest = Vec::new();
        let _ = tcp.read_to_end(&mut rest);
    });
    addr
}

#[test]
fn malformed_input_is_isolated() {
    init_logger();
    let definition = |device: &str| {
        format!(
            r#"<defNumberVector device="{device}" name="FOCUSER_POSITION" state="Ok" perm="rw">
  <defNumber name="POSITION" min="0" max="10000">1000</defNumber>
</defNumberVector>
"#
        )
    };
    let (good_gate, good_release) = mpsc::channel();
    let good = fake_server(
        vec![
            definition("Good Focuser"),
            r#"<setNumberVector device="Good Focuser" name="FOCUSER_POSITION" state="Busy">
  <oneNumber name="POSITION">1500</oneNumber>
</setNumberVector>
"#
            .to_string(),
        ],
        good_release,
    );
    let (bad_gate, bad_release) = mpsc::channel();
    let bad = fake_server(
        vec![
            definition("Bad Focuser"),
            "<setNumberVector device=\"Bad Focuser\" name=\"FOCUSER_POSITION\"></setTextVector>"
                .to_string(),
        ],
        bad_release,
    );

    let good = Session::start(IndigoClient::connect(good).unwrap(), None);
    assert_eq!(good.definitions(1)[0].device, "Good Focuser");
    let bad = Session::start(IndigoClient::connect(bad).unwrap(), None);
    assert_eq!(bad.definitions(1)[0].device, "Bad Focuser");

    bad_gate.send(()).unwrap();
    let outcome = bad.handle.join().unwrap();
    assert!(matches!(
        outcome,
        Outcome::Aborted(ParseError::InvalidFormat(_))
    ));
    let events: Vec<_> = bad.events.iter().collect();
    assert!(matches!(
        &events[..],
        [Event::Deleted { device, name: None }] if device == "Bad Focuser"
    ));

    good_gate.send(()).unwrap();
    let position = good.next_update("FOCUSER_POSITION");
    assert_eq!(position.state, PropertyState::Busy);
    let value = number(&position, "POSITION");
    assert_eq!((value.value, value.max), (1500.0, Some(10000.0)));

    drop(good_gate);
    let (outcome, events) = good.finish();
    assert!(matches!(outcome, Outcome::Closed));
    assert!(matches!(
        &events[..],
        [Event::Deleted { device, name: None }] if device == "Good Focuser"
    ));
}
