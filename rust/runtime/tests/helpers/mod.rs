//! Shared test programs, written the way compiled P code drives the runtime.

use std::sync::{Arc, Mutex};

use prt_runtime::{
    BlockFun, Event, EventDecl, Fault, FunFrame, Machine, MachineDef, PrtType, Registry,
    RuntimeConfig, RuntimeObserver, RuntimeState, State, StateId, Value,
};

/// Deterministic seed for reproducibility.
pub const SEED: [u8; 32] = [
    0x50, 0x52, 0x74, 0x52, 0x75, 0x6E, 0x74, 0x69, // "PRtRunti"
    0x6D, 0x65, 0x43, 0x6F, 0x6E, 0x66, 0x6F, 0x72, // "meConfor"
    0x6D, 0x61, 0x6E, 0x63, 0x65, 0x54, 0x65, 0x73, // "manceTes"
    0x74, 0x53, 0x75, 0x69, 0x74, 0x65, 0x56, 0x31, // "tSuiteV1"
];

// ============================================================================
// Events
// ============================================================================

pub fn ping() -> Event {
    Event::new("Ping", PrtType::Machine)
}

pub fn pong() -> Event {
    Event::new("Pong", PrtType::Null)
}

pub fn item(max_instances: Option<(usize, bool)>) -> Event {
    let decl = EventDecl::new("Item", PrtType::Int);
    match max_instances {
        Some((max, false)) => decl.with_max_instances(max).build(),
        Some((max, true)) => decl.with_assumed_max_instances(max).build(),
        None => decl.build(),
    }
}

pub fn release() -> Event {
    Event::new("Release", PrtType::Null)
}

pub fn noise() -> Event {
    Event::new("Noise", PrtType::Null)
}

pub fn answer() -> Event {
    Event::new("Answer", PrtType::Int)
}

pub fn req() -> Event {
    Event::new("Req", PrtType::Null)
}

pub fn resp() -> Event {
    Event::new("Resp", PrtType::Null)
}

pub fn ev(e: Event) -> Value {
    Value::Event(e)
}

fn bad_location(frame: &FunFrame) -> Fault {
    Fault::internal(format!("{} has no location {}", frame.fun.name(), frame.return_to))
}

/// Route `tracing` output to the test writer; `RUST_LOG=prt_runtime=debug`
/// shows machine steps.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn runtime(registry: Arc<Registry>) -> RuntimeState {
    RuntimeState::new(registry, RuntimeConfig::default())
}

/// Step enabled machines in creation order until none is enabled.
pub fn drain(rt: &mut RuntimeState) {
    rt.run(10_000).unwrap();
}

// ============================================================================
// Ping-pong
// ============================================================================

/// `Client` creates a `Server`, then exchanges `rounds` Ping/Pong pairs with
/// it and halts. Client field 1 counts pings sent.
pub fn ping_pong(rounds: i64) -> Arc<Registry> {
    let init_entry = BlockFun::anon("Client.Init.entry", 0, |cx, frame| match frame.return_to {
        0 => {
            let server = cx.create("Server", Value::Null)?;
            cx.set_field(0, server)?;
            cx.cont_new_machine(frame, 1)
        }
        1 => cx.goto(StateId(1), Value::Null),
        _ => Err(bad_location(&frame)),
    });
    let ping_entry = BlockFun::anon("Client.Pinging.entry", 0, move |cx, frame| {
        match frame.return_to {
            0 => {
                let sent = cx.field(1)?.as_int().unwrap_or(0);
                if sent >= rounds {
                    return cx.raise(&ev(Event::halt()), Value::Null);
                }
                cx.set_field(1, Value::Int(sent + 1))?;
                let server = cx.field(0)?;
                let me = cx.this()?;
                cx.send(&server, &ev(ping()), me)?;
                cx.cont_send(frame, 1)
            }
            1 => Ok(()),
            _ => Err(bad_location(&frame)),
        }
    });
    let client = MachineDef::builder("Client")
        .state(State::new("Init").on_entry(init_entry))
        .state(
            State::new("Pinging")
                .on_entry(ping_entry)
                .on_goto(&pong(), StateId(1), None),
        )
        .fields(vec![Value::Null, Value::Int(0)])
        .sends([ping()])
        .receives([pong()])
        .build()
        .unwrap();

    let reply = BlockFun::anon("Server.Waiting.Ping", 1, |cx, frame| match frame.return_to {
        0 => {
            cx.send(&frame.local(0), &ev(pong()), Value::Null)?;
            cx.cont_send(frame, 1)
        }
        1 => Ok(()),
        _ => Err(bad_location(&frame)),
    });
    let server = MachineDef::builder("Server")
        .state(State::new("Waiting").on_do(&ping(), reply))
        .sends([pong()])
        .receives([ping()])
        .build()
        .unwrap();

    Registry::builder()
        .define(client)
        .define(server)
        .link("Client", "Server", "Server")
        .visible_event("Ping")
        .visible_interface("Server")
        .build()
        .unwrap()
}

// ============================================================================
// Deferral
// ============================================================================

/// `Consumer` defers `Item` until `Release` arrives, then appends each item
/// payload to field 0. `Producer` sends `Item(1)`, `Item(2)`, `Release`.
pub fn deferral(item_bound: Option<(usize, bool)>) -> Arc<Registry> {
    let item_ev = item(item_bound);

    let spawn = BlockFun::anon("Consumer.Waiting.entry", 0, |cx, frame| match frame.return_to {
        0 => {
            let me = cx.this()?;
            cx.create("Producer", me)?;
            cx.cont_new_machine(frame, 1)
        }
        1 => Ok(()),
        _ => Err(bad_location(&frame)),
    });
    let collect = BlockFun::anon("Consumer.Ready.Item", 1, |cx, frame| {
        let mut items = match cx.field(0)? {
            Value::Seq(items) => items,
            _ => Vec::new(),
        };
        items.push(frame.local(0));
        cx.set_field(0, Value::Seq(items))
    });
    let consumer = MachineDef::builder("Consumer")
        .state(
            State::new("Waiting")
                .on_entry(spawn)
                .defer(&item_ev)
                .on_goto(&release(), StateId(1), None),
        )
        .state(State::new("Ready").on_do(&item_ev, collect))
        .fields(vec![Value::Seq(Vec::new())])
        .receives([item_ev.clone(), release()])
        .build()
        .unwrap();

    let produce_item = item_ev.clone();
    let produce = BlockFun::anon("Producer.Run.entry", 1, move |cx, frame| {
        let consumer = frame.local(0);
        match frame.return_to {
            0 => {
                cx.send(&consumer, &ev(produce_item.clone()), Value::Int(1))?;
                cx.cont_send(frame, 1)
            }
            1 => {
                cx.send(&consumer, &ev(produce_item.clone()), Value::Int(2))?;
                cx.cont_send(frame, 2)
            }
            2 => {
                cx.send(&consumer, &ev(release()), Value::Null)?;
                cx.cont_send(frame, 3)
            }
            3 => Ok(()),
            _ => Err(bad_location(&frame)),
        }
    });
    let producer = MachineDef::builder("Producer")
        .state(State::new("Run").on_entry(produce))
        .build()
        .unwrap();

    Registry::builder()
        .define(consumer)
        .define(producer)
        .link("Consumer", "Producer", "Producer")
        .build()
        .unwrap()
}

// ============================================================================
// Receive
// ============================================================================

/// `Asker` blocks in a receive for `Answer` while `Responder` first sends
/// `Noise`, which the asker ignores once the receive completes.
pub fn receive() -> Arc<Registry> {
    let ask = BlockFun::anon("Asker.Init.entry", 0, |cx, frame| match frame.return_to {
        0 => {
            let me = cx.this()?;
            cx.create("Responder", me)?;
            cx.cont_new_machine(frame, 1)
        }
        1 => cx.cont_receive(frame, 2, [answer()]),
        2 => {
            let got = cx.payload()?;
            cx.set_field(0, got)
        }
        _ => Err(bad_location(&frame)),
    });
    let asker = MachineDef::builder("Asker")
        .state(State::new("Init").on_entry(ask).ignore(&noise()))
        .fields(vec![Value::Null])
        .receives([answer(), noise()])
        .build()
        .unwrap();

    let respond = BlockFun::anon("Responder.Run.entry", 1, |cx, frame| {
        let asker = frame.local(0);
        match frame.return_to {
            0 => {
                cx.send(&asker, &ev(noise()), Value::Null)?;
                cx.cont_send(frame, 1)
            }
            1 => {
                cx.send(&asker, &ev(answer()), Value::Int(42))?;
                cx.cont_send(frame, 2)
            }
            2 => Ok(()),
            _ => Err(bad_location(&frame)),
        }
    });
    let responder = MachineDef::builder("Responder")
        .state(State::new("Run").on_entry(respond))
        .build()
        .unwrap();

    Registry::builder()
        .define(asker)
        .define(responder)
        .link("Asker", "Responder", "Responder")
        .build()
        .unwrap()
}

// ============================================================================
// Nondeterminism
// ============================================================================

/// `Chooser` stores one nondeterministic boolean in field 0.
pub fn chooser() -> Arc<Registry> {
    let choose = BlockFun::anon("Chooser.Init.entry", 0, |cx, frame| match frame.return_to {
        0 => cx.cont_nondet(frame, 1),
        1 => {
            let choice = cx.take_nondet()?;
            cx.set_field(0, Value::Bool(choice))
        }
        _ => Err(bad_location(&frame)),
    });
    let def = MachineDef::builder("Chooser")
        .state(State::new("Init").on_entry(choose))
        .fields(vec![Value::Null])
        .build()
        .unwrap();
    Registry::builder().define(def).build().unwrap()
}

// ============================================================================
// Monitors
// ============================================================================

/// `Client` announces `Req`, and `Resp` too when `respond` is set.
/// `Liveness` is hot between the two.
pub fn monitored(respond: bool) -> Arc<Registry> {
    let announce = BlockFun::anon("Client.Init.entry", 0, move |cx, _frame| {
        cx.announce(&ev(req()), Value::Null)?;
        if respond {
            cx.announce(&ev(resp()), Value::Null)?;
        }
        Ok(())
    });
    let client = MachineDef::builder("Client")
        .state(State::new("Init").on_entry(announce))
        .build()
        .unwrap();

    let liveness = MachineDef::builder("Liveness")
        .state(State::new("Idle").cold().on_goto(&req(), StateId(1), None))
        .state(State::new("Busy").hot().on_goto(&resp(), StateId(0), None))
        .observes([req(), resp()])
        .build()
        .unwrap();

    Registry::builder()
        .define(client)
        .define(liveness)
        .monitor("Liveness", ["Client"])
        .build()
        .unwrap()
}

// ============================================================================
// Single-machine programs
// ============================================================================

/// One machine `Main` with the given states.
pub fn single(states: Vec<State>, fields: Vec<Value>, receives: Vec<Event>) -> Arc<Registry> {
    let mut builder = MachineDef::builder("Main").fields(fields).receives(receives);
    for state in states {
        builder = builder.state(state);
    }
    Registry::builder().define(builder.build().unwrap()).build().unwrap()
}

/// Entry function that sends `event` to its own machine once.
pub fn send_self(event: Event) -> prt_runtime::FunRef {
    BlockFun::anon("Main.send_self", 0, move |cx, frame| match frame.return_to {
        0 => {
            let me = cx.this()?;
            cx.send(&me, &ev(event.clone()), Value::Null)?;
            cx.cont_send(frame, 1)
        }
        1 => Ok(()),
        _ => Err(bad_location(&frame)),
    })
}

// ============================================================================
// Observer
// ============================================================================

/// Records observer callbacks as strings.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, line: String) {
        self.events.lock().unwrap().push(line);
    }
}

impl RuntimeObserver for RecordingObserver {
    fn machine_created(&self, machine: &Machine) {
        self.push(format!("created {}", machine.display_name()));
    }

    fn event_dequeued(&self, machine: &Machine, event: &str, sender: &str, _sender_state: &str) {
        self.push(format!("{} dequeued {event} from {sender}", machine.display_name()));
    }

    fn state_transitioned(&self, machine: &Machine, from: &str, to: &str, reason: &str) {
        self.push(format!("{} {from} -> {to} ({reason})", machine.display_name()));
    }
}
