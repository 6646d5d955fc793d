//! Undirected peer adjacency graph and clique search.
//!
//! Built on `petgraph::graphmap::UnGraphMap` instead of a hand-rolled
//! `HashMap<PeerId, HashSet<PeerId>>`, since an undirected `GraphMap` gives
//! edge symmetry and vertex-set bookkeeping for free.

use {libp2p::PeerId, metrics::gauge, petgraph::graphmap::UnGraphMap, std::fmt::Write};

/// The adjacency graph of confirmed pairwise connections among a
/// facilitator and its joiners.
#[derive(Default)]
pub struct PeerMesh {
  graph: UnGraphMap<PeerId, ()>,
}

impl PeerMesh {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn contains(&self, peer: PeerId) -> bool {
    self.graph.contains_node(peer)
  }

  pub fn neighbours(&self, peer: PeerId) -> Vec<PeerId> {
    self.graph.neighbors(peer).collect()
  }

  /// Adds the edge (and both endpoint vertices). Returns `true`: this
  /// mutation could have introduced a new clique, hinting the caller to
  /// rescan.
  pub fn add_edge(&mut self, a: PeerId, b: PeerId) -> bool {
    self.graph.add_edge(a, b, ());
    gauge!("mesh_edges", self.graph.edge_count() as f64);
    true
  }

  /// Removes the edge without removing either endpoint, even if now
  /// isolated. Returns `false`: removals never introduce a clique.
  pub fn remove_edge(&mut self, a: PeerId, b: PeerId) -> bool {
    self.graph.remove_edge(a, b);
    self.graph.add_node(a);
    self.graph.add_node(b);
    gauge!("mesh_edges", self.graph.edge_count() as f64);
    false
  }

  /// Deletes `p` and every incident edge. Returns `false`.
  pub fn remove_peer(&mut self, p: PeerId) -> bool {
    self.graph.remove_node(p);
    gauge!("mesh_edges", self.graph.edge_count() as f64);
    false
  }

  /// Returns `n` peers including `required` forming a clique in the mesh,
  /// or `None` if no such clique exists. Correctness over performance: an
  /// O(2^deg) subset walk over `required`'s neighbourhood.
  pub fn find_clique(&self, n: usize, required: PeerId) -> Option<Vec<PeerId>> {
    if !self.graph.contains_node(required) {
      return None;
    }

    if n == 0 {
      return None;
    }

    if n == 1 {
      return Some(vec![required]);
    }

    let neighbours: Vec<PeerId> = self.graph.neighbors(required).collect();
    let need = n - 1;

    if neighbours.len() < need || neighbours.len() > 31 {
      return None;
    }

    let total: u32 = 1 << neighbours.len();
    for mask in 0..total {
      if mask.count_ones() as usize != need {
        continue;
      }

      let mut clique = Vec::with_capacity(n);
      clique.push(required);
      for (i, peer) in neighbours.iter().enumerate() {
        if mask & (1 << i) != 0 {
          clique.push(*peer);
        }
      }

      if self.is_clique(&clique) {
        return Some(clique);
      }
    }

    None
  }

  fn is_clique(&self, nodes: &[PeerId]) -> bool {
    for (i, &src) in nodes.iter().enumerate() {
      for (j, &dst) in nodes.iter().enumerate() {
        if i == j {
          continue;
        }
        if !self.graph.contains_edge(src, dst) {
          return false;
        }
      }
    }
    true
  }

  /// Deterministic stringification for logging: peers and their
  /// neighbours sorted by id.
  pub fn render(&self) -> String {
    let mut peers: Vec<PeerId> = self.graph.nodes().collect();
    peers.sort();

    let mut out = String::new();
    for (index, peer) in peers.iter().enumerate() {
      let mut neighbours: Vec<PeerId> = self.graph.neighbors(*peer).collect();
      neighbours.sort();
      let indices: Vec<String> = neighbours
        .iter()
        .map(|n| peers.binary_search(n).expect("neighbour is a vertex").to_string())
        .collect();
      let _ = writeln!(out, "{index} {peer}: {}", indices.join(" "));
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pid() -> PeerId {
    PeerId::random()
  }

  #[test]
  fn add_edge_is_symmetric() {
    let (a, b) = (pid(), pid());
    let mut mesh = PeerMesh::new();
    mesh.add_edge(a, b);
    assert!(mesh.neighbours(a).contains(&b));
    assert!(mesh.neighbours(b).contains(&a));
  }

  #[test]
  fn remove_edge_keeps_isolated_vertices() {
    let (a, b) = (pid(), pid());
    let mut mesh = PeerMesh::new();
    mesh.add_edge(a, b);
    mesh.remove_edge(a, b);
    assert!(mesh.contains(a));
    assert!(mesh.contains(b));
    assert!(mesh.neighbours(a).is_empty());
  }

  #[test]
  fn remove_peer_deletes_incident_edges() {
    let (a, b, c) = (pid(), pid(), pid());
    let mut mesh = PeerMesh::new();
    mesh.add_edge(a, b);
    mesh.add_edge(a, c);
    mesh.remove_peer(a);
    assert!(!mesh.contains(a));
    assert!(mesh.neighbours(b).is_empty());
    assert!(mesh.neighbours(c).is_empty());
  }

  #[test]
  fn find_clique_boundary_n1() {
    let a = pid();
    let mut mesh = PeerMesh::new();
    assert_eq!(mesh.find_clique(1, a), None);
    mesh.add_edge(a, pid());
    assert_eq!(mesh.find_clique(1, a), Some(vec![a]));
  }

  #[test]
  fn find_clique_boundary_too_few_neighbours() {
    let (a, b) = (pid(), pid());
    let mut mesh = PeerMesh::new();
    mesh.add_edge(a, b);
    assert_eq!(mesh.find_clique(3, a), None);
  }

  #[test]
  fn find_clique_triangle() {
    let (a, b, c) = (pid(), pid(), pid());
    let mut mesh = PeerMesh::new();
    mesh.add_edge(a, b);
    mesh.add_edge(a, c);
    mesh.add_edge(b, c);
    let clique = mesh.find_clique(3, a).unwrap();
    assert_eq!(clique.len(), 3);
    assert!(clique.contains(&a));
    assert!(clique.contains(&b));
    assert!(clique.contains(&c));
  }

  #[test]
  fn find_clique_no_clique_present() {
    // a-b, a-c, but b and c are not connected: no triangle containing a.
    let (a, b, c) = (pid(), pid(), pid());
    let mut mesh = PeerMesh::new();
    mesh.add_edge(a, b);
    mesh.add_edge(a, c);
    assert_eq!(mesh.find_clique(3, a), None);
  }

  #[test]
  fn add_and_remove_edge_are_idempotent() {
    let (a, b) = (pid(), pid());
    let mut mesh = PeerMesh::new();
    mesh.add_edge(a, b);
    mesh.add_edge(a, b);
    assert_eq!(mesh.neighbours(a).len(), 1);

    mesh.remove_edge(a, b);
    mesh.remove_edge(a, b);
    assert!(mesh.neighbours(a).is_empty());
  }
}
