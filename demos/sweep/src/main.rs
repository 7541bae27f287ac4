use clap::Parser;
use rand::prelude::*;
use vne::{
    core::{
        experiment::{Experiment, TrialOutcome},
        network::{Link, LinkId, Node, NodeId, VLink, VLinkId, VNode, VNodeId, VnId},
        params::{AlgoKind, DistributedSweep, ParamSpace},
        scenario::{Request, Scenario},
    },
    solvers::GoodLpSolver,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Mapping algorithm (greedy, coordinated, distributed, math_prog)
    #[arg(short, long, default_value = "greedy")]
    algorithm: String,

    /// Number of substrate nodes
    #[arg(short, long, default_value_t = 20)]
    nodes: usize,

    /// Probability of a link between two nodes, on top of a spanning tree
    #[arg(short, long, default_value_t = 0.1)]
    density: f64,

    /// Number of virtual network requests
    #[arg(short, long, default_value_t = 50)]
    requests: usize,

    /// Random seed
    #[arg(short, long, default_value_t = 0)]
    seed: u64,
}

const NODE_CPU: f64 = 100.0;
const LINK_BANDWIDTH: f64 = 100.0;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    anyhow::ensure!(args.nodes >= 2, "the substrate needs at least two nodes");
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.density),
        "density must be between 0.0 and 1.0"
    );
    let (algorithm, params) = match args.algorithm.as_str() {
        "greedy" => (
            AlgoKind::Greedy,
            ParamSpace::new()
                .dimension("k", [1i64, 2, 4])
                .dimension("path_splitting", [false, true]),
        ),
        "coordinated" => (
            AlgoKind::Coordinated,
            ParamSpace::new()
                .dimension("weight_bw", [0.5, 1.0, 2.0])
                .dimension("randomize", [false, true]),
        ),
        "distributed" => (
            AlgoKind::Distributed,
            DistributedSweep::builder()
                .weights(vec![0.5, 1.0])
                .delegation_levels(vec![0, 1, 2])
                .max_levels(vec![2])
                .build()
                .space(),
        ),
        "math_prog" => (
            AlgoKind::MathProg,
            ParamSpace::new().dimension("mode", ["exact", "rounded"]),
        ),
        other => anyhow::bail!("unknown algorithm: {other}"),
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let (nodes, links) = gen_substrate(args.nodes, args.density, &mut rng);
    let requests = (0..args.requests)
        .map(|i| gen_request(VnId::new(i), &mut rng))
        .collect();
    let scenario = Scenario::builder()
        .nodes(nodes)
        .links(links)
        .requests(requests)
        .algorithm(algorithm)
        .params(params)
        .build()
        .validate()?;

    let reports = Experiment::default().run(&scenario, &GoodLpSolver::default());
    println!("trial  accepted  ratio  node util  link util       cost  params");
    for r in reports {
        match r.outcome {
            TrialOutcome::Completed(m) => println!(
                "{:>5}  {:>8}  {:>5.2}  {:>9.3}  {:>9.3}  {:>9.1}  {}",
                r.id,
                m.accepted,
                m.acceptance_ratio,
                m.node_utilization,
                m.link_utilization,
                m.cost,
                r.params
            ),
            TrialOutcome::Failed { error, .. } => {
                println!("{:>5}  failed: {error}  {}", r.id, r.params)
            }
        }
    }
    Ok(())
}

/// A random spanning tree over `n` nodes plus every other pair with probability `density`.
fn gen_substrate(n: usize, density: f64, mut rng: impl Rng) -> (Vec<Node>, Vec<Link>) {
    let nodes = (0..n)
        .map(|i| Node::with_cpu(NodeId::new(i), NODE_CPU))
        .collect::<Vec<_>>();
    let mut pairs = (1..n).map(|i| (rng.gen_range(0..i), i)).collect::<Vec<_>>();
    for a in 0..n {
        for b in a + 1..n {
            if !pairs.contains(&(a, b)) && rng.gen_bool(density) {
                pairs.push((a, b));
            }
        }
    }
    let links = pairs
        .into_iter()
        .enumerate()
        .map(|(i, (a, b))| {
            Link::new(
                LinkId::new(i),
                NodeId::new(a),
                NodeId::new(b),
                LINK_BANDWIDTH,
            )
        })
        .collect();
    (nodes, links)
}

/// A random tree of 2 to 5 virtual nodes.
fn gen_request(id: VnId, mut rng: impl Rng) -> Request {
    let n = rng.gen_range(2..=5);
    let nodes = (0..n)
        .map(|i| VNode::with_cpu(VNodeId::new(i), rng.gen_range(5..=20) as f64))
        .collect();
    let links = (1..n)
        .map(|i| {
            VLink::new(
                VLinkId::new(i - 1),
                VNodeId::new(rng.gen_range(0..i)),
                VNodeId::new(i),
                rng.gen_range(5..=30) as f64,
            )
        })
        .collect();
    Request::builder().id(id).nodes(nodes).links(links).build()
}
