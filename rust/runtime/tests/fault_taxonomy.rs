//! Faults raised by running programs, and how they end a branch.

#[allow(dead_code)]
mod helpers;

use std::sync::Arc;

use assert_matches::assert_matches;
use prt_runtime::{
    fault_code, BlockFun, Event, Fault, FaultClass, MachineDef, MachineId, MachineRef, PrtType,
    Registry, RuntimeError, RuntimeState, State, Value,
};

use helpers::{ev, runtime};

/// Run to quiescence and return the fault that ended the branch.
fn run_to_fault(rt: &mut RuntimeState) -> Arc<Fault> {
    match rt.run(10_000) {
        Err(RuntimeError::Faulted(fault)) => fault,
        other => panic!("expected a fault, got {other:?}"),
    }
}

fn e() -> Event {
    Event::new("E", PrtType::Null)
}

fn single_main(state: State) -> RuntimeState {
    let registry = helpers::single(vec![state], vec![Value::Null], vec![e()]);
    let mut rt = runtime(registry);
    rt.create_main_machine("Main").unwrap();
    rt
}

#[test]
fn max_instances_is_a_defect() {
    let mut rt = runtime(helpers::deferral(Some((1, false))));
    rt.create_main_machine("Consumer").unwrap();
    let fault = run_to_fault(&mut rt);
    assert_matches!(
        &*fault,
        Fault::MaxInstancesExceeded { event, max: 1 } if event == "Item"
    );
    assert_eq!(fault.class(), FaultClass::Defect);
    assert_eq!(fault_code(&fault), "prt.fault.max_instances");
}

#[test]
fn assumed_bound_marks_branch_infeasible() {
    let mut rt = runtime(helpers::deferral(Some((1, true))));
    rt.create_main_machine("Consumer").unwrap();
    let fault = run_to_fault(&mut rt);
    assert_matches!(&*fault, Fault::AssumeFailure { .. });
    assert!(fault.is_infeasible());
}

#[test]
fn faulted_branch_refuses_further_steps() {
    let mut rt = runtime(helpers::deferral(Some((1, false))));
    let consumer = rt.create_main_machine("Consumer").unwrap();
    let fault = run_to_fault(&mut rt);

    assert_eq!(rt.fault(), Some(&fault));
    assert_matches!(rt.run_machine(consumer), Err(RuntimeError::Terminated(f)) if f == fault);
    assert_matches!(
        rt.create_main_machine("Consumer"),
        Err(RuntimeError::Terminated(_))
    );
}

#[test]
fn unhandled_event_names_machine_and_event() {
    let mut rt = single_main(State::new("Init").on_entry(helpers::send_self(e())));
    let fault = run_to_fault(&mut rt);
    assert_matches!(
        &*fault,
        Fault::UnhandledEvent { machine, event } if machine == "Main-1" && event == "E"
    );
}

#[test]
fn pop_from_last_state_is_invalid() {
    let pop = BlockFun::anon("Main.Init.entry", 0, |cx, _frame| cx.pop());
    let mut rt = single_main(State::new("Init").on_entry(pop));
    let fault = run_to_fault(&mut rt);
    assert_matches!(&*fault, Fault::InvalidPopStatement { machine } if machine == "Main-1");
}

#[test]
fn failed_assert_is_reported() {
    let check = BlockFun::anon("Main.Init.entry", 0, |cx, _frame| cx.assert(false, "never"));
    let mut rt = single_main(State::new("Init").on_entry(check));
    let fault = run_to_fault(&mut rt);
    assert_matches!(&*fault, Fault::AssertionFailed { message, .. } if message == "never");
}

#[test]
fn send_outside_handle_permissions_is_illegal() {
    let other = Event::new("Other", PrtType::Null);
    let mut rt = single_main(State::new("Init").on_entry(helpers::send_self(other)));
    let fault = run_to_fault(&mut rt);
    assert_matches!(&*fault, Fault::IllegalEnqueue { .. });
}

#[test]
fn send_outside_declared_sends_is_illegal() {
    let def = MachineDef::builder("Main")
        .state(State::new("Init").on_entry(helpers::send_self(e())).ignore(&e()))
        .receives([e()])
        .sends([])
        .build()
        .unwrap();
    let mut rt = runtime(Registry::builder().define(def).build().unwrap());
    rt.create_main_machine("Main").unwrap();
    let fault = run_to_fault(&mut rt);
    assert_matches!(&*fault, Fault::IllegalEnqueue { message } if message.contains("not allowed"));
}

#[test]
fn send_with_mistyped_payload_is_rejected() {
    let typed = Event::new("Typed", PrtType::Int);
    let send = BlockFun::anon("Main.Init.entry", 0, move |cx, frame| {
        let me = cx.this()?;
        cx.send(&me, &ev(typed.clone()), Value::Bool(true))?;
        cx.cont_send(frame, 1)
    });
    let registry = helpers::single(
        vec![State::new("Init").on_entry(send)],
        Vec::new(),
        vec![Event::new("Typed", PrtType::Int)],
    );
    let mut rt = runtime(registry);
    rt.create_main_machine("Main").unwrap();
    let fault = run_to_fault(&mut rt);
    assert_matches!(&*fault, Fault::InhabitsType { .. });
}

#[test]
fn mailbox_bound_is_enforced_before_enqueue() {
    let twice = BlockFun::anon("Main.Init.entry", 0, |cx, frame| {
        let me = cx.this()?;
        match frame.return_to {
            0 => {
                cx.send(&me, &ev(e()), Value::Null)?;
                cx.cont_send(frame, 1)
            }
            1 => {
                cx.send(&me, &ev(e()), Value::Null)?;
                cx.cont_send(frame, 2)
            }
            _ => Ok(()),
        }
    });
    let def = MachineDef::builder("Main")
        .state(State::new("Init").on_entry(twice).defer(&e()))
        .receives([e()])
        .max_buffer_size(1)
        .build()
        .unwrap();
    let mut rt = runtime(Registry::builder().define(def).build().unwrap());
    let main = rt.create_main_machine("Main").unwrap();
    let fault = run_to_fault(&mut rt);
    assert_matches!(&*fault, Fault::MaxBufferSizeExceeded { max: 1, .. });
    assert_eq!(rt.machine(main).unwrap().mailbox().len(), 1);
}

#[test]
fn announce_checks_event_and_payload() {
    let mut rt = runtime(helpers::monitored(false));
    rt.create_spec_machine("Liveness").unwrap();
    let client = rt.create_main_machine("Client").unwrap();
    let source = MachineRef::Impl(client);

    assert_matches!(
        rt.announce(&Value::Null, &Value::Null, source),
        Err(Fault::IllegalEnqueue { .. })
    );
    assert_matches!(
        rt.announce(&Value::Int(3), &Value::Null, source),
        Err(Fault::IllegalEnqueue { .. })
    );
    assert_matches!(
        rt.announce(&ev(helpers::req()), &Value::Int(1), source),
        Err(Fault::InhabitsType { .. })
    );
    assert!(rt.monitor("Liveness").unwrap().mailbox().is_empty());

    rt.announce(&ev(helpers::req()), &Value::Null, source).unwrap();
    assert_eq!(rt.monitor("Liveness").unwrap().mailbox().len(), 1);
}

#[test]
fn announce_reaches_each_monitor_watching_event_and_source() {
    let req = helpers::req();
    let resp = helpers::resp();
    let watcher = |name: &str, observes: Vec<Event>| {
        MachineDef::builder(name)
            .state(State::new("Watch").ignore(&req).ignore(&resp))
            .observes(observes)
            .build()
            .unwrap()
    };
    let plain = |name: &str| {
        MachineDef::builder(name)
            .state(State::new("Init"))
            .build()
            .unwrap()
    };
    let registry = Registry::builder()
        .define(plain("Client"))
        .define(plain("Other"))
        .define(watcher("First", vec![req.clone()]))
        .define(watcher("Second", vec![req.clone(), resp.clone()]))
        .define(watcher("RespOnly", vec![resp.clone()]))
        .define(watcher("OtherOnly", vec![req.clone()]))
        .monitor("First", ["Client"])
        .monitor("Second", ["Client", "Other"])
        .monitor("RespOnly", ["Client"])
        .monitor("OtherOnly", ["Other"])
        .build()
        .unwrap();
    let mut rt = runtime(registry);
    for name in ["First", "Second", "RespOnly", "OtherOnly"] {
        rt.create_spec_machine(name).unwrap();
    }
    let client = rt.create_main_machine("Client").unwrap();

    rt.announce(&ev(req), &Value::Null, MachineRef::Impl(client))
        .unwrap();

    let queued = |name: &str| rt.monitor(name).unwrap().mailbox().len();
    assert_eq!(queued("First"), 1);
    assert_eq!(queued("Second"), 1);
    assert_eq!(queued("RespOnly"), 0);
    assert_eq!(queued("OtherOnly"), 0);
    assert_eq!(rt.trace().tagged("<AnnounceLog>").count(), 2);
}

#[test]
fn host_errors_do_not_fault_the_branch() {
    let mut rt = runtime(helpers::ping_pong(1));
    assert_matches!(
        rt.create_main_machine("Nope"),
        Err(RuntimeError::UnknownDefinition { name }) if name == "Nope"
    );
    let client = rt.create_main_machine("Client").unwrap();
    assert_matches!(
        rt.create_interface(client, "Nope", Value::Null),
        Err(RuntimeError::UnknownLink { .. })
    );
    assert_matches!(
        rt.run_machine(MachineId(7)),
        Err(RuntimeError::UnknownMachine(MachineId(7)))
    );
    assert!(rt.fault().is_none());

    let server = rt.create_interface(client, "Server", Value::Null).unwrap();
    assert_eq!(server.machine(), MachineId(1));
    assert!(server.permits(&helpers::ping()));
    assert!(!server.permits(&helpers::pong()));
}
