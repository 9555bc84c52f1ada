use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use rayon::prelude::*;

use effect_graph_compiler::cache::{GraphCache, GraphSource};
use effect_graph_compiler::dynamic_param::DynamicParamTable;
use effect_graph_compiler::error::{CompileError, Result};
use effect_graph_compiler::fragment_parser::{parse_extension_points, parse_fragment_file};
use effect_graph_compiler::graph::Graph;
use effect_graph_compiler::inputs::{gather_inputs, InstanceDesc};
use effect_graph_compiler::interner::InternerPools;
use effect_graph_compiler::merge::{self, Component};
use effect_graph_compiler::registry::TypeRegistry;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse every `.ffx` fragment file in a folder and report the
    /// resulting TypeRegistry's NodeType and extension-point counts.
    LoadRegistry {
        /// Folder to scan for `.ffx` fragment files.
        fragment_folder: String,
    },
    /// Load a fragment folder plus an ordered list of `(group_index,
    /// graph_file)` pairs, merge them, and print the merged graph's
    /// `type_id` and node count.
    Merge {
        /// Folder to scan for `.ffx` fragment files.
        fragment_folder: String,
        /// Graph files to merge, in `group_index:path` form (e.g.
        /// `0:body.fxgraph`).
        components: Vec<String>,
    },
    /// Load a fragment folder plus a single graph file and print the
    /// gathered uniform and binding input counts.
    Inputs {
        /// Folder to scan for `.ffx` fragment files.
        fragment_folder: String,
        /// The graph file to gather inputs for.
        graph_file: String,
    },
}

/// Reads `.fxgraph`/`.matgraph` files relative to a base directory. File I/O
/// is kept out of `cache::GraphCache` itself (spec 1's "external
/// collaborator" boundary); this is the CLI's own implementation of it.
struct FilesystemGraphSource {
    base_dir: PathBuf,
}

impl GraphSource for FilesystemGraphSource {
    fn read_graph_file(&self, filename: &str) -> Result<String> {
        std::fs::read_to_string(self.base_dir.join(filename)).map_err(|e| CompileError::GraphParse {
            file: filename.to_string(),
            message: e.to_string(),
        })
    }
}

fn load_registry(fragment_folder: &str) -> (TypeRegistry, u32) {
    let mut registry = TypeRegistry::new();

    // Collect paths first (filesystem I/O), then parse in parallel since
    // parsing is the CPU-heavy part and each file is independent.
    let paths: Vec<_> = globwalk::GlobWalkerBuilder::from_patterns(fragment_folder, &["*.ffx"])
        .build()
        .unwrap()
        .filter_map(|e| e.map(|e| e.path().to_owned()).ok())
        .collect();

    // Parsing itself is the CPU-heavy part and each file is independent, so
    // fragment bodies parse in parallel; registering the resulting
    // NodeTypes (and the extension points, which mutate the registry
    // directly) happens afterwards, in file order, since the registry
    // itself isn't shared across threads.
    let parsed: Vec<_> = paths
        .into_par_iter()
        .map(|path| {
            let source = std::fs::read_to_string(&path).map_err(|e| (path.clone(), e.to_string()))?;
            let node_types = parse_fragment_file(&path.to_string_lossy(), &source).map_err(|e| (path.clone(), e.to_string()))?;
            Ok::<_, (PathBuf, String)>((path, source, node_types))
        })
        .collect();

    for result in parsed {
        match result {
            Ok((path, source, node_types)) => {
                for node_type in node_types {
                    registry.insert(node_type);
                }
                if let Err(e) = parse_extension_points(&path.to_string_lossy(), &source, &mut registry) {
                    log::error!("failed to load extension points from {}: {e}", path.display());
                }
            }
            Err((path, message)) => log::error!("failed to load {}: {message}", path.display()),
        }
    }

    let table = DynamicParamTable::new();
    if let Err(e) = registry.synthesize_dynamic_node_types(&table) {
        log::error!("failed to synthesize dynamic node types: {e}");
    }
    let num_output_types = registry.assign_output_type_indices();
    (registry, num_output_types)
}

fn load_graph(
    cache: &GraphCache,
    source: &dyn GraphSource,
    registry: &TypeRegistry,
    interner: &InternerPools,
    num_output_types: u32,
    filename: &str,
) -> Option<std::sync::Arc<Graph>> {
    match cache.get(filename, source, registry, interner, num_output_types) {
        Ok(graph) => Some(graph),
        Err(e) => {
            log::error!("failed to load {filename}: {e}");
            None
        }
    }
}

fn main() {
    simple_logger::SimpleLogger::new().with_level(log::LevelFilter::Warn).init().unwrap();

    let cli = Cli::parse();

    let start = std::time::Instant::now();
    match cli.command {
        Commands::LoadRegistry { fragment_folder } => {
            let (registry, num_output_types) = load_registry(&fragment_folder);
            println!("Loaded {} node types ({num_output_types} output types).", registry.len());
        }
        Commands::Merge { fragment_folder, components } => {
            let (registry, num_output_types) = load_registry(&fragment_folder);
            let interner = InternerPools::new();
            let source = FilesystemGraphSource { base_dir: Path::new(&fragment_folder).to_owned() };
            let cache = GraphCache::new();

            let mut parsed = Vec::new();
            for component in &components {
                let Some((group_index, path)) = component.split_once(':') else {
                    log::error!("expected group_index:path, got {component}");
                    continue;
                };
                let Ok(group_index) = group_index.parse::<u32>() else {
                    log::error!("invalid group_index in {component}");
                    continue;
                };
                if let Some(graph) = load_graph(&cache, &source, &registry, &interner, num_output_types, path) {
                    parsed.push((group_index, graph));
                }
            }

            let merge_components: Vec<Component> =
                parsed.iter().map(|(group_index, graph)| Component { group_index: *group_index, graph: graph.as_ref() }).collect();
            match merge::merge(&registry, &interner, num_output_types, interner.filenames.intern("merged"), &merge_components) {
                Ok(merged) => println!("Merged graph type_id={} nodes={}", merged.type_id, merged.nodes.len()),
                Err(e) => log::error!("merge failed: {e}"),
            }
        }
        Commands::Inputs { fragment_folder, graph_file } => {
            let (registry, num_output_types) = load_registry(&fragment_folder);
            let interner = InternerPools::new();
            let source = FilesystemGraphSource { base_dir: Path::new(&fragment_folder).to_owned() };
            let cache = GraphCache::new();

            if let Some(graph) = load_graph(&cache, &source, &registry, &interner, num_output_types, &graph_file) {
                let instance = InstanceDesc::new(interner.filenames.intern(&graph_file));
                let graph_file_hash = merge::hash_filename(&graph_file);
                let (uniforms, bindings) = gather_inputs(&graph, &registry, graph_file_hash, &[instance]);
                println!("{} uniform inputs, {} binding inputs", uniforms.len(), bindings.len());
            }
        }
    }

    log::info!("Finished in {:?}", start.elapsed());
}
