//! End-to-end coverage across the registry, loader, merger and inputs
//! gatherer together, mirroring how a real caller drives the crate: parse a
//! registry, load one or more authored graphs, merge them, gather inputs.

use std::thread;

use pretty_assertions::assert_eq;

use effect_graph_compiler::cache::{GraphCache, InMemoryGraphSource};
use effect_graph_compiler::graph::load::{load_graph_file, LoadedGraphFile};
use effect_graph_compiler::graph::{BlendMode, Graph};
use effect_graph_compiler::inputs::{gather_inputs, InstanceDesc};
use effect_graph_compiler::interner::InternerPools;
use effect_graph_compiler::merge::{self, Component};
use effect_graph_compiler::param::{GraphType, ParameterSchema};
use effect_graph_compiler::registry::{ExtensionPointBase, NodeType, TypeRegistry};
use effect_graph_compiler::stage::Stage;

fn albedo_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    let mut base = ExtensionPointBase::default();
    base.default_stage = Some(Stage::Texturing);
    registry.insert_extension_point("AlbedoColor", GraphType::Float4, base);
    registry.assign_output_type_indices();
    registry
}

/// A registry with `AlbedoColor` plus a constant-float4 source type and a
/// scale-multiply type, used by the cross-graph relink scenario.
fn relink_registry() -> TypeRegistry {
    let mut registry = albedo_registry();

    let mut constant = NodeType::new("ConstantFloat4");
    constant.output_ports.push(effect_graph_compiler::registry::OutputPort {
        name: "value".into(),
        graph_type: GraphType::Float4,
    });
    constant.parameters.push(ParameterSchema::plain(
        "Value",
        GraphType::Float4,
        vec![0.0.into(), 0.0.into(), 0.0.into(), 0.0.into()],
        vec![0.0.into(); 4],
        vec![1.0.into(); 4],
    ));
    registry.insert(constant);

    let mut multiply = NodeType::new("MultiplyScale");
    multiply.input_ports.push(effect_graph_compiler::registry::InputPort {
        name: "value".into(),
        graph_type: GraphType::Float4,
    });
    multiply.output_ports.push(effect_graph_compiler::registry::OutputPort {
        name: "value".into(),
        graph_type: GraphType::Float4,
    });
    multiply.parameters.push(ParameterSchema::plain("Scale", GraphType::Float, vec![1.0.into()], vec![0.0.into()], vec![1.0.into()]));
    registry.insert(multiply);

    registry
}

/// A registry with a single sampler-typed node, used by the sampler-index
/// hash sensitivity scenario.
fn sampler_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    let mut sample = NodeType::new("SampleTexture");
    sample.parameters.push(ParameterSchema::plain("Tex", GraphType::Sampler, vec![], vec![], vec![]));
    sample.output_ports.push(effect_graph_compiler::registry::OutputPort { name: "value".into(), graph_type: GraphType::Float4 });
    registry.insert(sample);
    registry.assign_output_type_indices();
    registry
}

fn load(filename: &str, source: &str, registry: &TypeRegistry, interner: &InternerPools, num_output_types: u32) -> Graph {
    match load_graph_file(filename, source, registry, interner, num_output_types).unwrap() {
        LoadedGraphFile::Direct(g) => g,
        _ => panic!("expected direct graph, not a matgraph wrapper"),
    }
}

/// S1 — empty material: one `.matgraph` referencing a zero-node `.fxgraph`.
#[test]
fn s1_empty_material() {
    let registry = albedo_registry();
    let interner = InternerPools::new();
    let mut source = InMemoryGraphSource::new();
    source.insert("base.fxgraph", r#"{"version":3,"nodes":[],"links":[]}"#);
    source.insert("obj.matgraph", r#"{"version":3,"default_graph":"base.fxgraph","overwrites":{}}"#);
    let cache = GraphCache::new();

    let graph = cache.get("obj.matgraph", &source, &registry, &interner, 1).unwrap();
    let merged = merge::merge(&registry, &interner, 1, interner.filenames.intern("merged"), &[Component { group_index: 0, graph: &graph }]).unwrap();

    assert_ne!(merged.type_id, 0);
    assert_eq!(merged.flags, Default::default());
    assert_eq!(merged.blend_mode(), BlendMode::Opaque);

    let instance = InstanceDesc::new(interner.filenames.intern("obj.matgraph"));
    let (uniforms, bindings) = gather_inputs(&merged, &registry, merge::hash_filename("obj.matgraph"), &[instance]);
    assert!(uniforms.is_empty());
    assert!(bindings.is_empty());
}

/// S2 — a passthrough read/write pair has no effect and contributes nothing.
#[test]
fn s2_single_passthrough_has_no_effect() {
    let registry = albedo_registry();
    let interner = InternerPools::new();
    let source = r#"{
        "version": 3,
        "nodes": [
            {"name":"r","type":"read_AlbedoColor","stage":"Texturing","index":0},
            {"name":"w","type":"write_AlbedoColor","stage":"Texturing","index":0}
        ],
        "links": [
            {"src":{"type":"read_AlbedoColor","index":0,"stage":"Texturing","variable":"value"},
             "dst":{"type":"write_AlbedoColor","index":0,"stage":"Texturing","variable":"value"},
             "child_link": false}
        ]
    }"#;
    let graph = load("p.fxgraph", source, &registry, &interner, 1);
    let head = graph.heads()[0];
    assert!(graph.has_no_effect(head, &registry));

    let merged = merge::merge(&registry, &interner, 1, interner.filenames.intern("merged"), &[Component { group_index: 0, graph: &graph }]).unwrap();
    assert_eq!(merged.nodes.len(), 0);

    let instance = InstanceDesc::new(interner.filenames.intern("p.fxgraph"));
    let (uniforms, _) = gather_inputs(&merged, &registry, 0, &[instance]);
    assert!(uniforms.is_empty());
}

/// S3 — cross-graph relink: component A writes AlbedoColor from a
/// constant; component B reads it, scales it, and writes it again.
#[test]
fn s3_cross_graph_relink() {
    let registry = relink_registry();
    let interner = InternerPools::new();

    let source_a = r#"{
        "version": 3,
        "nodes": [
            {"name":"const","type":"ConstantFloat4","stage":"Texturing","index":0,"parameters":{"Value":[1.0,0.0,0.0,1.0]}},
            {"name":"w","type":"write_AlbedoColor","stage":"Texturing","index":0}
        ],
        "links": [
            {"src":{"type":"ConstantFloat4","index":0,"stage":"Texturing","variable":"value"},
             "dst":{"type":"write_AlbedoColor","index":0,"stage":"Texturing","variable":"value"},
             "child_link": false}
        ]
    }"#;
    let source_b = r#"{
        "version": 3,
        "nodes": [
            {"name":"r","type":"read_AlbedoColor","stage":"Texturing","index":0},
            {"name":"mul","type":"MultiplyScale","stage":"Texturing","index":0,"parameters":{"Scale":[0.5]}},
            {"name":"w","type":"write_AlbedoColor","stage":"Texturing","index":0}
        ],
        "links": [
            {"src":{"type":"read_AlbedoColor","index":0,"stage":"Texturing","variable":"value"},
             "dst":{"type":"MultiplyScale","index":0,"stage":"Texturing","variable":"value"},
             "child_link": false},
            {"src":{"type":"MultiplyScale","index":0,"stage":"Texturing","variable":"value"},
             "dst":{"type":"write_AlbedoColor","index":0,"stage":"Texturing","variable":"value"},
             "child_link": false}
        ]
    }"#;

    let graph_a = load("a.fxgraph", source_a, &registry, &interner, 1);
    let graph_b = load("b.fxgraph", source_b, &registry, &interner, 1);

    let components = [Component { group_index: 0, graph: &graph_a }, Component { group_index: 0, graph: &graph_b }];
    let merged = merge::merge(&registry, &interner, 1, interner.filenames.intern("merged"), &components).unwrap();

    assert_eq!(merged.nodes.len(), 5);
    let const_type = registry.get_by_name("ConstantFloat4").unwrap().type_id;
    let write_type = registry.get_by_name("write_AlbedoColor").unwrap().type_id;
    let read_type = registry.get_by_name("read_AlbedoColor").unwrap().type_id;
    let mul_type = registry.get_by_name("MultiplyScale").unwrap().type_id;

    assert_eq!(merged.nodes[0].node_type_id, const_type);
    assert_eq!(merged.nodes[1].node_type_id, write_type);
    assert_eq!(merged.nodes[2].node_type_id, read_type);
    assert_eq!(merged.nodes[3].node_type_id, mul_type);
    assert_eq!(merged.nodes[4].node_type_id, write_type);

    // B's read node's single input link is the synthetic relink back to A's write node.
    assert_eq!(merged.nodes[2].input_links.len(), 1);
    assert_eq!(merged.nodes[2].input_links[0].producer, 1);

    // Every link's producer precedes its consumer (invariant 4, no cycles).
    for (consumer_idx, node) in merged.nodes.iter().enumerate() {
        for link in node.input_links.iter().chain(node.stage_links.iter()).chain(node.child_links.iter()) {
            assert!((link.producer as usize) < consumer_idx);
        }
    }

    let merged_a_alone = merge::merge(&registry, &interner, 1, interner.filenames.intern("a"), &[Component { group_index: 0, graph: &graph_a }]).unwrap();
    let merged_b_alone = merge::merge(&registry, &interner, 1, interner.filenames.intern("b"), &[Component { group_index: 0, graph: &graph_b }]).unwrap();
    assert_ne!(merged.type_id, merged_a_alone.type_id);
    assert_ne!(merged.type_id, merged_b_alone.type_id);

    // Snapshot the merge's node shape (type names, per-type indices, stages)
    // rather than the `type_id` integer, which is exercised numerically by
    // the assertions above.
    insta::assert_snapshot!(merged.debug_text(&registry), @r###"
    0: ConstantFloat4#0 stage=Texturing
    1: write_AlbedoColor#0 stage=Texturing
    2: read_AlbedoColor#0 stage=Texturing
    3: MultiplyScale#0 stage=Texturing
    4: write_AlbedoColor#1 stage=Texturing
    "###);
}

/// S4 — the same merge built concurrently on two threads produces equal
/// `type_id`s (the merger takes only shared references, spec 5).
#[test]
fn s4_deterministic_across_threads() {
    let registry = relink_registry();
    let interner = InternerPools::new();

    let source_a = r#"{
        "version": 3,
        "nodes": [
            {"name":"const","type":"ConstantFloat4","stage":"Texturing","index":0,"parameters":{"Value":[1.0,0.0,0.0,1.0]}},
            {"name":"w","type":"write_AlbedoColor","stage":"Texturing","index":0}
        ],
        "links": [
            {"src":{"type":"ConstantFloat4","index":0,"stage":"Texturing","variable":"value"},
             "dst":{"type":"write_AlbedoColor","index":0,"stage":"Texturing","variable":"value"},
             "child_link": false}
        ]
    }"#;
    let graph_a = load("a.fxgraph", source_a, &registry, &interner, 1);

    let (id_1, id_2) = thread::scope(|scope| {
        let handle_1 = scope.spawn(|| {
            merge::merge(&registry, &interner, 1, interner.filenames.intern("merged"), &[Component { group_index: 0, graph: &graph_a }]).unwrap().type_id
        });
        let handle_2 = scope.spawn(|| {
            merge::merge(&registry, &interner, 1, interner.filenames.intern("merged"), &[Component { group_index: 0, graph: &graph_a }]).unwrap().type_id
        });
        (handle_1.join().unwrap(), handle_2.join().unwrap())
    });

    assert_eq!(id_1, id_2);
}

/// S5 — an instance-level alpha-ref override produces exactly one uniform
/// with the fixed `(1, value, 0.001, 1)` vector shape.
#[test]
fn s5_alpha_ref_override_propagation() {
    let registry = albedo_registry();
    let interner = InternerPools::new();
    let source = r#"{"version":3,"nodes":[],"links":[],"overwrites":{"alpha_ref":[1.0,0.5,0.001,1.0]}}"#;
    let graph = load("p.fxgraph", source, &registry, &interner, 1);

    let mut instance = InstanceDesc::new(interner.filenames.intern("p.fxgraph"));
    instance.alpha_ref = Some(0.25);

    let (uniforms, _) = gather_inputs(&graph, &registry, 0, &[instance]);
    assert_eq!(uniforms.len(), 1);
    let values: Vec<f32> = uniforms[0].values.iter().map(|s| s.value()).collect();
    assert_eq!(values, vec![1.0, 0.25, 0.001, 1.0]);
    assert_eq!(uniforms[0].stage, Stage::VertexInit);
}

/// S6 — two merges identical except for one sampler's bound index produce
/// different `type_id`s (samplers participate in content hashing, spec 4.6).
#[test]
fn s6_sampler_index_participates_in_hash() {
    let registry = sampler_registry();
    let interner = InternerPools::new();

    let source_for = |sampler_index: u32| {
        format!(
            r#"{{"version":3,"nodes":[{{"name":"s","type":"SampleTexture","stage":"Texturing","index":0,"parameters":{{"Tex":{{"sampler_index":{sampler_index}}}}}}}],"links":[]}}"#
        )
    };

    let graph_0 = load("g0.fxgraph", &source_for(0), &registry, &interner, 1);
    let graph_3 = load("g3.fxgraph", &source_for(3), &registry, &interner, 1);

    assert_ne!(graph_0.type_id, graph_3.type_id);
}
