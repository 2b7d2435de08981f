//! Reference counting, creation, cascading release and shutdown

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{record_destructions, ScriptedFactory};
use sensorium::{Context, NodeQuery, NodeType, Status};

/// Device factory plus a depth factory whose candidates need a device
fn device_and_depth(ctx: &Context) -> (Arc<ScriptedFactory>, Arc<ScriptedFactory>) {
    let device = ScriptedFactory::new(NodeType::DEVICE, "Acme", "Sensor").shared();
    let depth = ScriptedFactory::new(NodeType::DEPTH, "Acme", "Depth")
        .needs(NodeType::DEVICE)
        .shared();
    assert!(ctx.register_factory(device.clone()).unwrap());
    assert!(ctx.register_factory(depth.clone()).unwrap());
    (device, depth)
}

#[test]
fn test_ref_counting_single_destruction_event() {
    let ctx = Context::new();
    let destroyed = record_destructions(&ctx);

    let node = ctx.create_mock_node(NodeType::DEPTH, None).unwrap();
    let handle = node.handle();
    let second = node.clone();
    assert_eq!(ctx.ref_count(handle), Ok(2));

    drop(node);
    assert_eq!(ctx.ref_count(handle), Ok(1));
    assert!(destroyed.lock().is_empty());

    drop(second);
    assert_eq!(*destroyed.lock(), vec!["Depth1".to_string()]);
    assert_eq!(ctx.ref_count(handle), Err(Status::BadParam));

    // releasing a destroyed node is an error and raises nothing
    assert_eq!(ctx.release(handle), Err(Status::BadParam));
    assert_eq!(destroyed.lock().len(), 1);
}

#[test]
fn test_raw_references_balance() {
    let ctx = Context::new();
    let node = ctx.create_mock_node(NodeType::IMAGE, Some("Cam")).unwrap();
    let handle = node.into_raw();

    ctx.add_ref(handle).unwrap();
    assert_eq!(ctx.ref_count(handle), Ok(2));
    ctx.release(handle).unwrap();
    assert_eq!(ctx.node_name(handle).unwrap(), "Cam");

    let adopted = ctx.adopt(handle).unwrap();
    assert_eq!(adopted.handle(), handle);
    drop(adopted);
    assert_eq!(ctx.node_count(), 0);
}

#[test]
fn test_cascading_release_order() {
    let ctx = Context::new();
    let (device, depth) = device_and_depth(&ctx);
    let destroyed = record_destructions(&ctx);

    let node = ctx
        .create_any_production_tree(NodeType::DEPTH, None, None)
        .unwrap();
    assert_eq!(ctx.node_count(), 2);
    assert_eq!(ctx.node_name(node.handle()).unwrap(), "Depth1");

    let needed = ctx.needed_nodes(node.handle()).unwrap();
    assert_eq!(needed.len(), 1);
    assert_eq!(ctx.node_name(needed[0]).unwrap(), "Device1");
    // only the dependent holds the device
    assert_eq!(ctx.ref_count(needed[0]), Ok(1));
    assert_eq!(ctx.dependents_count(needed[0]), Ok(1));

    drop(node);
    assert_eq!(
        *destroyed.lock(),
        vec!["Depth1".to_string(), "Device1".to_string()]
    );
    assert_eq!(ctx.node_count(), 0);
    assert_eq!(*depth.probe.shut_down.lock(), vec!["Depth1".to_string()]);
    assert_eq!(*device.probe.shut_down.lock(), vec!["Device1".to_string()]);
}

#[test]
fn test_shared_needed_node_outlives_first_dependent() {
    let ctx = Context::new();
    let (device, _depth) = device_and_depth(&ctx);

    let first = ctx
        .create_any_production_tree(NodeType::DEPTH, None, None)
        .unwrap();
    let device_handle = ctx.needed_nodes(first.handle()).unwrap()[0];

    // skip the live depth node; the first candidate reuses the live device
    let mut query = NodeQuery::new();
    query.set_non_existing_node_only(true).unwrap();
    let second = ctx
        .create_any_production_tree(NodeType::DEPTH, Some(&query), None)
        .unwrap();
    assert_ne!(first.handle(), second.handle());
    assert_eq!(ctx.needed_nodes(second.handle()).unwrap(), vec![device_handle]);
    assert_eq!(ctx.ref_count(device_handle), Ok(2));
    assert_eq!(device.probe.instantiated(), 1);

    drop(first);
    assert_eq!(ctx.ref_count(device_handle), Ok(1));
    drop(second);
    assert_eq!(ctx.ref_count(device_handle), Err(Status::BadParam));
    assert_eq!(ctx.node_count(), 0);
}

#[test]
fn test_failed_creation_rolls_back_needed_nodes() {
    let ctx = Context::new();
    let (device, depth) = device_and_depth(&ctx);
    let destroyed = record_destructions(&ctx);
    depth.set_instantiate_error(Some(Status::DeviceNotConnected));

    let result = ctx.create_any_production_tree(NodeType::DEPTH, None, None);
    assert_eq!(result.unwrap_err(), Status::DeviceNotConnected);
    assert_eq!(device.probe.instantiated(), 1);
    assert_eq!(*destroyed.lock(), vec!["Device1".to_string()]);
    assert_eq!(ctx.node_count(), 0);

    // the failed node's name was never taken
    depth.set_instantiate_error(None);
    let node = ctx
        .create_any_production_tree(NodeType::DEPTH, None, None)
        .unwrap();
    assert_eq!(ctx.node_name(node.handle()).unwrap(), "Depth1");
}

#[test]
fn test_created_info_tracks_tree() {
    let ctx = Context::new();
    device_and_depth(&ctx);

    let mut list = ctx
        .enumerate_production_trees(NodeType::DEPTH, None, None)
        .unwrap();
    let mut info = list.remove(0).unwrap();
    drop(list);
    assert!(!info.is_existing());

    let node = ctx.create_production_tree(&mut info).unwrap();
    assert_eq!(info.handle(), Some(node.handle()));
    assert_eq!(info.instance_name(), Some("Depth1"));
    let device = info.needed_nodes().first().unwrap();
    assert!(device.is_existing());

    // node ref + info
    assert_eq!(ctx.ref_count(node.handle()), Ok(2));
    drop(info);
    assert_eq!(ctx.ref_count(node.handle()), Ok(1));

    // creating from an info that already tracks a node is just another ref
    let mut existing = ctx.node_info(node.handle()).unwrap();
    assert_eq!(existing.instance_name(), Some("Depth1"));
    let again = ctx.create_production_tree(&mut existing).unwrap();
    assert_eq!(again.handle(), node.handle());
    assert_eq!(ctx.ref_count(node.handle()), Ok(3));
}

#[test]
fn test_existing_info_references() {
    let ctx = Context::new();
    let node = ctx.create_mock_node(NodeType::USER, None).unwrap();

    let info = ctx.node_info(node.handle()).unwrap();
    assert_eq!(ctx.ref_count(node.handle()), Ok(2));
    let copy = info.clone();
    assert_eq!(ctx.ref_count(node.handle()), Ok(3));
    let extra = info.get_ref_handle().unwrap();
    assert_eq!(ctx.ref_count(node.handle()), Ok(4));

    drop(copy);
    drop(extra);
    drop(info);
    assert_eq!(ctx.ref_count(node.handle()), Ok(1));
}

#[test]
fn test_needed_node_edges() {
    let ctx = Context::new();
    let destroyed = record_destructions(&ctx);
    let user = ctx.create_mock_node(NodeType::USER, None).unwrap();
    let depth = ctx.create_mock_node(NodeType::DEPTH, None).unwrap();
    let (u, d) = (user.handle(), depth.handle());

    ctx.add_needed_node(u, d).unwrap();
    assert_eq!(ctx.ref_count(d), Ok(2));
    assert_eq!(ctx.is_needed_node(u, d), Ok(true));
    // adding twice keeps a single edge
    ctx.add_needed_node(u, d).unwrap();
    assert_eq!(ctx.ref_count(d), Ok(2));

    assert_eq!(ctx.add_needed_node(d, u), Err(Status::InvalidOperation));
    assert_eq!(ctx.add_needed_node(u, u), Err(Status::InvalidOperation));

    drop(depth);
    assert!(destroyed.lock().is_empty());

    ctx.remove_needed_node(u, d).unwrap();
    assert_eq!(*destroyed.lock(), vec!["Depth1".to_string()]);
    assert_eq!(ctx.remove_needed_node(u, d), Err(Status::BadParam));
}

#[test]
fn test_remove_unneeded_node_is_invalid() {
    let ctx = Context::new();
    let a = ctx.create_mock_node(NodeType::DEVICE, None).unwrap();
    let b = ctx.create_mock_node(NodeType::DEVICE, None).unwrap();
    assert_eq!(
        ctx.remove_needed_node(a.handle(), b.handle()),
        Err(Status::InvalidOperation)
    );
}

#[test]
fn test_shutdown_destroys_dependents_first() {
    let ctx = Context::new();
    device_and_depth(&ctx);
    let destroyed = record_destructions(&ctx);
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&shutdowns);
    ctx.register_to_shutdown(move |_: &()| {
        s.fetch_add(1, Ordering::SeqCst);
    });

    let node = ctx
        .create_any_production_tree(NodeType::DEPTH, None, None)
        .unwrap();
    ctx.force_shutdown();
    ctx.force_shutdown();

    assert_eq!(
        *destroyed.lock(),
        vec!["Depth1".to_string(), "Device1".to_string()]
    );
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert!(ctx.is_shut_down());
    assert_eq!(
        ctx.create_mock_node(NodeType::DEPTH, None).unwrap_err(),
        Status::NotInit
    );

    // references outliving the nodes are harmless
    drop(node);
    assert_eq!(destroyed.lock().len(), 2);
}

#[test]
fn test_clone_after_destruction_is_detached() {
    let ctx = Context::new();
    let node = ctx.create_mock_node(NodeType::DEPTH, None).unwrap();
    let live = node.clone();
    assert_eq!(ctx.ref_count(node.handle()), Ok(2));
    drop(live);
    assert_eq!(ctx.ref_count(node.handle()), Ok(1));

    ctx.force_shutdown();
    let late = node.clone();
    assert_eq!(late.handle(), node.handle());
    assert!(late.context().is_none());
    assert!(node.context().is_some());
    drop(late);
    drop(node);
    assert_eq!(ctx.node_count(), 0);
}

#[test]
fn test_last_context_clone_shuts_down() {
    let ctx = Context::new();
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&shutdowns);
    ctx.register_to_shutdown(move |_: &()| {
        s.fetch_add(1, Ordering::SeqCst);
    });
    let weak = ctx.downgrade();
    let node = ctx.create_mock_node(NodeType::AUDIO, None).unwrap();

    let clone = ctx.clone();
    drop(ctx);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
    assert!(weak.upgrade().is_some());

    drop(clone);
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert!(weak.upgrade().is_none());
    assert!(node.context().is_none());
}

#[test]
fn test_mock_based_on_copies_properties() {
    let ctx = Context::new();
    let original = ctx.create_mock_node(NodeType::DEPTH, Some("Kinect")).unwrap();
    ctx.set_int_property(original.handle(), "MaxDepth", 10_000).unwrap();
    ctx.set_string_property(original.handle(), "Serial", "A00").unwrap();

    let mock = ctx.create_mock_node_based_on(original.handle(), None).unwrap();
    assert_eq!(ctx.node_name(mock.handle()).unwrap(), "Kinect_Mock");
    assert_eq!(ctx.get_int_property(mock.handle(), "MaxDepth"), Ok(10_000));
    assert_eq!(ctx.get_string_property(mock.handle(), "Serial").unwrap(), "A00");
    assert_eq!(
        ctx.get_real_property(mock.handle(), "Serial"),
        Err(Status::NoMatch)
    );

    let named = ctx
        .create_mock_node_based_on(original.handle(), Some("Copy"))
        .unwrap();
    assert_eq!(ctx.node_name(named.handle()).unwrap(), "Copy");
}
