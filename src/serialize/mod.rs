//! Versioned binary graph blobs.
//!
//! A blob is the magic `EVSG`, the format version as a little-endian `u16`,
//! then a MessagePack [`GraphProto`]. Loading replays every operator through
//! the same validation as graph construction.
pub mod error;
pub mod proto;

pub use error::{DeserializationError, SerializationError};
pub use proto::{FeatureProto, GraphProto, IoProto, NodeProto, OperatorProto, SamplingProto};

use crate::analysis::ScheduleError;
use crate::graph::Processor;
use crate::ops::OperatorRegistry;
use crate::store::arena::check_source_columns;
use crate::store::{Feature, GraphError, GraphStore, NodeId, OperatorId, SamplingId};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const MAGIC: &[u8; 4] = b"EVSG";
pub const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + 2;

/// A graph restored from a blob, with its declared inputs and outputs.
#[derive(Debug, Clone)]
pub struct LoadedGraph {
    pub store: GraphStore,
    pub inputs: Vec<(String, NodeId)>,
    pub outputs: Vec<(String, NodeId)>,
}

impl LoadedGraph {
    pub fn input(&self, name: &str) -> Option<NodeId> {
        self.inputs.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    pub fn output(&self, name: &str) -> Option<NodeId> {
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    pub fn processor(&self) -> Result<Processor, ScheduleError> {
        Processor::infer_named(&self.store, self.inputs.clone(), self.outputs.clone())
    }
}

/// Builds the blob body for the processor's slice of `store`.
///
/// Local ids follow arena order, so the same slice always encodes the same way.
pub fn to_proto(store: &GraphStore, processor: &Processor) -> Result<GraphProto, SerializationError> {
    let declared_inputs: HashSet<NodeId> = processor.input_ids().collect();
    let operator_ids: BTreeMap<OperatorId, u32> =
        processor.operators().iter().enumerate().map(|(i, &op)| (op, i as u32)).collect();

    let mut node_set: BTreeSet<NodeId> = processor.nodes().clone();
    for &op in processor.operators() {
        let operator = store.operator(op).ok_or(SerializationError::UnknownOperator(op))?;
        node_set.extend(operator.outputs().iter().map(|(_, n)| *n));
    }
    let nodes = node_set
        .iter()
        .map(|&id| store.node(id).map(|n| (id, n)).ok_or(SerializationError::UnknownNode(id)))
        .collect::<Result<Vec<_>, _>>()?;
    let node_ids: BTreeMap<NodeId, u32> = nodes.iter().enumerate().map(|(i, (id, _))| (*id, i as u32)).collect();
    let sampling_set: BTreeSet<SamplingId> = nodes.iter().map(|(_, n)| n.sampling()).collect();
    let sampling_ids: BTreeMap<SamplingId, u32> =
        sampling_set.iter().enumerate().map(|(i, &s)| (s, i as u32)).collect();

    let local_operator = |op: Option<OperatorId>| op.and_then(|op| operator_ids.get(&op).copied());
    let local_node = |id: NodeId| node_ids.get(&id).copied().ok_or(SerializationError::UnknownNode(id));
    let local_slots = |slots: &[(String, NodeId)]| {
        slots.iter().map(|(slot, n)| Ok((slot.clone(), local_node(*n)?))).collect::<Result<Vec<_>, SerializationError>>()
    };

    let mut proto = GraphProto::default();
    for &id in &sampling_set {
        let sampling = store.sampling(id).ok_or(SerializationError::UnknownSampling(id))?;
        proto.samplings.push(SamplingProto {
            index: sampling.index().to_vec(),
            is_unix_timestamp: sampling.is_unix_timestamp(),
            creator: local_operator(sampling.creator()),
        });
    }
    for (id, node) in &nodes {
        proto.nodes.push(NodeProto {
            name: node.name().map(str::to_string),
            features: node.features().iter().map(|f| FeatureProto { name: f.name().to_string(), dtype: f.dtype() }).collect(),
            sampling: sampling_ids[&node.sampling()],
            // Declared inputs become sources of the restored graph.
            creator: if declared_inputs.contains(id) { None } else { local_operator(node.creator()) },
        });
    }
    for &op in processor.operators() {
        let operator = store.operator(op).ok_or(SerializationError::UnknownOperator(op))?;
        proto.operators.push(OperatorProto {
            key: operator.key().to_string(),
            attributes: operator.attributes().clone(),
            inputs: local_slots(operator.inputs())?,
            outputs: local_slots(operator.outputs())?,
        });
    }
    for (name, id) in processor.inputs() {
        proto.inputs.push(IoProto { name: name.clone(), node: local_node(*id)? });
    }
    for (name, id) in processor.outputs() {
        proto.outputs.push(IoProto { name: name.clone(), node: local_node(*id)? });
    }
    Ok(proto)
}

pub fn serialize(store: &GraphStore, processor: &Processor) -> Result<Vec<u8>, SerializationError> {
    let proto = to_proto(store, processor)?;
    let mut bytes = Vec::with_capacity(256);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    rmp_serde::encode::write_named(&mut bytes, &proto)?;
    debug!(operators = proto.operators.len(), nodes = proto.nodes.len(), bytes = bytes.len(), "graph serialized");
    Ok(bytes)
}

/// Pretty JSON view of the blob body, for debugging.
pub fn to_json(store: &GraphStore, processor: &Processor) -> Result<String, SerializationError> {
    Ok(serde_json::to_string_pretty(&to_proto(store, processor)?)?)
}

#[instrument(skip_all, fields(bytes = bytes.len()))]
pub fn deserialize(bytes: &[u8], registry: Arc<OperatorRegistry>) -> Result<LoadedGraph, DeserializationError> {
    if bytes.get(..MAGIC.len()) != Some(&MAGIC[..]) {
        return Err(DeserializationError::BadMagic);
    }
    let version = match bytes.get(MAGIC.len()..HEADER_LEN) {
        Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
        _ => return Err(DeserializationError::Malformed("truncated header".into())),
    };
    if version != FORMAT_VERSION {
        return Err(DeserializationError::UnsupportedVersion { found: version, supported: FORMAT_VERSION });
    }
    let proto: GraphProto =
        rmp_serde::from_slice(&bytes[HEADER_LEN..]).map_err(|e| DeserializationError::Malformed(e.to_string()))?;
    from_proto(proto, registry)
}

fn reference(
    kind: &'static str,
    id: u32,
    bound: usize,
    context: impl FnOnce() -> String,
) -> Result<u32, DeserializationError> {
    if (id as usize) < bound {
        Ok(id)
    } else {
        Err(DeserializationError::DanglingReference { kind, id, context: context() })
    }
}

/// Rebuilds a graph from a decoded body.
///
/// Samplings and nodes are declared first, then operators are bound in blob
/// order and each one must infer exactly the output nodes the blob declares.
pub fn from_proto(proto: GraphProto, registry: Arc<OperatorRegistry>) -> Result<LoadedGraph, DeserializationError> {
    let GraphProto { samplings, nodes, operators, inputs, outputs } = proto;
    let operator_count = operators.len();
    let mut store = GraphStore::new(Arc::clone(&registry));

    for (i, sampling) in samplings.into_iter().enumerate() {
        let creator = sampling
            .creator
            .map(|op| reference("operator", op, operator_count, || format!("sampling #{}", i)))
            .transpose()?;
        store.declare_sampling(sampling.index, sampling.is_unix_timestamp, creator.map(OperatorId));
    }

    let sampling_count = store.sampling_count();
    for (i, node) in nodes.into_iter().enumerate() {
        let sampling = reference("sampling", node.sampling, sampling_count, || format!("node #{}", i))?;
        let creator = node
            .creator
            .map(|op| reference("operator", op, operator_count, || format!("node #{}", i)))
            .transpose()?;
        if creator.is_none() {
            // Sources obey the same column rules as `GraphStore::add_input`.
            let index = store.sampling(SamplingId(sampling)).map(|s| s.index()).unwrap_or_default();
            check_source_columns(node.features.iter().map(|f| f.name.as_str()), index)?;
        }
        let features = node.features.into_iter().map(|f| Feature { name: f.name, dtype: f.dtype, creator: None }).collect();
        store.declare_node(node.name, features, SamplingId(sampling), creator.map(OperatorId));
    }

    let node_count = store.node_count();
    for (i, operator) in operators.into_iter().enumerate() {
        if registry.get(&operator.key).is_none() {
            return Err(DeserializationError::UnknownOperator { key: operator.key, operator: i as u32 });
        }
        let context = || format!("operator #{} ({})", i, operator.key);
        let slots = |slots: &[(String, u32)]| {
            slots
                .iter()
                .map(|(slot, n)| Ok((slot.clone(), NodeId(reference("node", *n, node_count, context)?))))
                .collect::<Result<Vec<_>, DeserializationError>>()
        };
        let inputs = slots(&operator.inputs)?;
        let outputs = slots(&operator.outputs)?;
        store.bind_operator(&operator.key, inputs, operator.attributes, &outputs).map_err(|e| match e {
            GraphError::InvalidAttribute { operator, attribute, message } => {
                DeserializationError::MalformedAttribute { operator, attribute, message }
            }
            other => DeserializationError::Validation(other),
        })?;
    }

    // A node may only name a creator that actually bound it.
    for id in store.node_ids() {
        let Some(node) = store.node(id) else { continue };
        let Some(op) = node.creator() else { continue };
        let bound = store.operator(op).is_some_and(|o| o.outputs().iter().any(|(_, n)| *n == id));
        if !bound {
            return Err(DeserializationError::DanglingReference {
                kind: "operator",
                id: op.0,
                context: format!("creator of node #{}", id.0),
            });
        }
    }

    let declared = |entries: Vec<IoProto>, what: &str| {
        entries
            .into_iter()
            .map(|e| Ok((e.name, NodeId(reference("node", e.node, node_count, || format!("graph {}", what))?))))
            .collect::<Result<Vec<_>, DeserializationError>>()
    };
    let inputs = declared(inputs, "input")?;
    let outputs = declared(outputs, "output")?;

    debug!(operators = operator_count, nodes = node_count, "graph deserialized");
    Ok(LoadedGraph { store, inputs, outputs })
}

pub fn save_to_file(path: impl AsRef<Path>, store: &GraphStore, processor: &Processor) -> Result<(), SerializationError> {
    std::fs::write(path, serialize(store, processor)?)?;
    Ok(())
}

pub fn load_from_file(path: impl AsRef<Path>, registry: Arc<OperatorRegistry>) -> Result<LoadedGraph, DeserializationError> {
    let bytes = std::fs::read(path)?;
    deserialize(&bytes, registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{build_schedule, schedule_processor, Schedule, ScheduleError};
    use crate::ops::{self, standard_registry};
    use crate::store::{AttributeValue, DType, IndexLevel, InputSpec};
    use rstest::rstest;

    fn graph() -> (GraphStore, Processor) {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g
            .add_input(InputSpec::new("a").feature("x", DType::Float64).feature("k", DType::Int64))
            .unwrap();
        let b = ops::add_index(&mut g, a, &["k"]).unwrap();
        let c = ops::simple_moving_average(&mut g, b, 3.0).unwrap();
        let d = ops::drop_index(&mut g, c, &["k"], true).unwrap();
        let e = ops::abs(&mut g, a).unwrap();
        let p = Processor::infer(&g, &[a], &[d, e]).unwrap();
        (g, p)
    }

    fn encode(proto: &GraphProto) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend(rmp_serde::to_vec_named(proto).unwrap());
        bytes
    }

    fn shape(store: &GraphStore, schedule: &Schedule) -> Vec<(String, Vec<String>)> {
        schedule
            .steps
            .iter()
            .map(|s| {
                let out = store.node(s.outputs[0].1).unwrap();
                let index = store.sampling(out.sampling()).unwrap().index_names().map(str::to_string);
                let features = out.features().iter().map(|f| format!("{}:{}", f.name(), f.dtype()));
                (s.key.clone(), features.chain(index).collect())
            })
            .collect()
    }

    #[test]
    fn test_round_trip_keeps_schedule() {
        let (g, p) = graph();
        let bytes = serialize(&g, &p).unwrap();
        let loaded = deserialize(&bytes, standard_registry().unwrap()).unwrap();

        let original = schedule_processor(&g, &p).unwrap();
        let restored = schedule_processor(&loaded.store, &loaded.processor().unwrap()).unwrap();
        assert_eq!(shape(&g, &original), shape(&loaded.store, &restored));
        let operators = |store: &GraphStore, schedule: &Schedule| {
            schedule
                .steps
                .iter()
                .map(|s| {
                    let op = store.operator(s.operator).unwrap();
                    (op.key().to_string(), op.attributes().clone(), op.inputs().len(), op.outputs().len())
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(operators(&g, &original), operators(&loaded.store, &restored));
        assert_eq!(loaded.inputs.len(), 1);
        assert!(loaded.input("a").is_some());
        assert!(loaded.output("output_0").is_some());

        let again = serialize(&loaded.store, &loaded.processor().unwrap()).unwrap();
        assert_eq!(bytes, again);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let (g, p) = graph();
        assert_eq!(serialize(&g, &p).unwrap(), serialize(&g, &p).unwrap());
        let json = to_json(&g, &p).unwrap();
        assert!(json.contains("SIMPLE_MOVING_AVERAGE"));
    }

    #[test]
    fn test_crafted_cycle_loads_but_does_not_schedule() {
        let x = || vec![FeatureProto { name: "x".into(), dtype: DType::Float64 }];
        let abs = |input: u32, output: u32| OperatorProto {
            key: "ABS".into(),
            attributes: Default::default(),
            inputs: vec![("input".into(), input)],
            outputs: vec![("output".into(), output)],
        };
        let proto = GraphProto {
            samplings: vec![SamplingProto { index: vec![], is_unix_timestamp: false, creator: None }],
            nodes: vec![
                NodeProto { name: Some("a".into()), features: x(), sampling: 0, creator: None },
                NodeProto { name: None, features: x(), sampling: 0, creator: Some(0) },
                NodeProto { name: None, features: x(), sampling: 0, creator: Some(1) },
            ],
            operators: vec![abs(2, 1), abs(1, 2)],
            inputs: vec![IoProto { name: "a".into(), node: 0 }],
            outputs: vec![IoProto { name: "out".into(), node: 2 }],
        };
        let loaded = deserialize(&encode(&proto), standard_registry().unwrap()).unwrap();
        let err = build_schedule(&loaded.store, &[NodeId(0)], &[NodeId(2)]).unwrap_err();
        match err {
            ScheduleError::CyclicGraph { operators, .. } => assert_eq!(operators, vec![OperatorId(0), OperatorId(1)]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_version_and_magic() {
        let (g, p) = graph();
        let mut bytes = serialize(&g, &p).unwrap();
        bytes[4] = 2;
        let err = deserialize(&bytes, standard_registry().unwrap()).unwrap_err();
        assert!(matches!(err, DeserializationError::UnsupportedVersion { found: 2, supported: 1 }));

        bytes[0] = b'X';
        let err = deserialize(&bytes, standard_registry().unwrap()).unwrap_err();
        assert!(matches!(err, DeserializationError::BadMagic));
        assert!(matches!(deserialize(&[], standard_registry().unwrap()), Err(DeserializationError::BadMagic)));
        assert!(matches!(deserialize(b"EVSG\x01", standard_registry().unwrap()), Err(DeserializationError::Malformed(_))));
    }

    #[test]
    fn test_rejects_unknown_operator() {
        let (g, p) = graph();
        let mut proto = to_proto(&g, &p).unwrap();
        proto.operators[0].key = "NOT_AN_OPERATOR".into();
        let err = deserialize(&encode(&proto), standard_registry().unwrap()).unwrap_err();
        assert!(matches!(err, DeserializationError::UnknownOperator { operator: 0, .. }));
    }

    #[test]
    fn test_rejects_dangling_reference() {
        let (g, p) = graph();
        let mut proto = to_proto(&g, &p).unwrap();
        proto.operators[0].inputs[0].1 = 99;
        let err = deserialize(&encode(&proto), standard_registry().unwrap()).unwrap_err();
        assert!(matches!(err, DeserializationError::DanglingReference { kind: "node", id: 99, .. }));

        let mut proto = to_proto(&g, &p).unwrap();
        proto.outputs[0].node = 42;
        let err = deserialize(&encode(&proto), standard_registry().unwrap()).unwrap_err();
        assert!(matches!(err, DeserializationError::DanglingReference { kind: "node", id: 42, .. }));
    }

    #[test]
    fn test_rejects_malformed_attribute() {
        let (g, p) = graph();
        let mut proto = to_proto(&g, &p).unwrap();
        let sma = proto.operators.iter_mut().find(|o| o.key == "SIMPLE_MOVING_AVERAGE").unwrap();
        sma.attributes.insert("window_length".into(), AttributeValue::String("three".into()));
        let err = deserialize(&encode(&proto), standard_registry().unwrap()).unwrap_err();
        match err {
            DeserializationError::MalformedAttribute { operator, attribute, .. } => {
                assert_eq!(operator, "SIMPLE_MOVING_AVERAGE");
                assert_eq!(attribute, "window_length");
            }
            other => panic!("expected a malformed attribute, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_schema_that_disagrees_with_inference() {
        let (g, p) = graph();
        let mut proto = to_proto(&g, &p).unwrap();
        let abs = proto.operators.iter().find(|o| o.key == "ABS").unwrap();
        let out = abs.outputs[0].1 as usize;
        proto.nodes[out].features[0].dtype = DType::Int32;
        let err = deserialize(&encode(&proto), standard_registry().unwrap()).unwrap_err();
        assert!(matches!(err, DeserializationError::Validation(GraphError::OutputMismatch { .. })));
    }

    #[rstest]
    #[case::index_collides(&[("id", DType::Int64)], &[("id", DType::Int64)], "collides")]
    #[case::duplicate_feature(&[("x", DType::Float64), ("x", DType::Int32)], &[], "duplicate")]
    #[case::float_index(&[("x", DType::Float64)], &[("k", DType::Float64)], "unsupported dtype")]
    fn test_rejects_source_columns_that_add_input_rejects(
        #[case] features: &[(&str, DType)],
        #[case] index: &[(&str, DType)],
        #[case] expected: &str,
    ) {
        let mut spec = InputSpec::new("a");
        for (name, dtype) in features {
            spec = spec.feature(*name, *dtype);
        }
        for (name, dtype) in index {
            spec = spec.index(*name, *dtype);
        }
        let mut g = GraphStore::new(standard_registry().unwrap());
        let err = g.add_input(spec).unwrap_err();
        assert!(matches!(&err, GraphError::InvalidArguments { message, .. } if message.contains(expected)));

        let proto = GraphProto {
            samplings: vec![SamplingProto {
                index: index.iter().map(|(name, dtype)| IndexLevel::new(*name, *dtype)).collect(),
                is_unix_timestamp: false,
                creator: None,
            }],
            nodes: vec![NodeProto {
                name: Some("a".into()),
                features: features.iter().map(|(name, dtype)| FeatureProto { name: name.to_string(), dtype: *dtype }).collect(),
                sampling: 0,
                creator: None,
            }],
            operators: vec![],
            inputs: vec![IoProto { name: "a".into(), node: 0 }],
            outputs: vec![IoProto { name: "a".into(), node: 0 }],
        };
        let err = deserialize(&encode(&proto), standard_registry().unwrap()).unwrap_err();
        match err {
            DeserializationError::Validation(GraphError::InvalidArguments { message, .. }) => {
                assert!(message.contains(expected), "{message}")
            }
            other => panic!("expected invalid source columns, got {other:?}"),
        }
    }

    #[test]
    fn test_file_round_trip() {
        let (g, p) = graph();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.evsg");
        save_to_file(&path, &g, &p).unwrap();
        let loaded = load_from_file(&path, standard_registry().unwrap()).unwrap();
        assert_eq!(loaded.outputs.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(), vec!["output_0", "output_1"]);
        assert!(matches!(
            load_from_file(dir.path().join("missing.evsg"), standard_registry().unwrap()),
            Err(DeserializationError::Io(_))
        ));
    }
}
