//! # Conic Backend
//!
//! $$
//! \min_x \tfrac12 x^\top P x + q^\top x\quad\text{s.t.}\quad Ax+s=b,\ s\in\mathcal K
//! $$
//!
//! Exact reformulation of a [`SimplexProgram`] as a conic program solved by an
//! interior-point method. Auxiliary variables: one epigraph scalar per L2 term,
//! one absolute-deviation vector per L1 term or turnover cap, and a `(z, u)`
//! pair per tail-loss term or cap.

use clarabel::algebra::CscMatrix;
use clarabel::solver::DefaultSettingsBuilder;
use clarabel::solver::DefaultSolver;
use clarabel::solver::IPSolver;
use clarabel::solver::SolverStatus;
use clarabel::solver::SupportedConeT;
use ndarray::Array1;
use tracing::debug;

use super::super::error::GeneratorError;
use super::Constraint;
use super::ConvexSolverStrategy;
use super::SimplexProgram;
use super::TailLoss;
use super::Term;

/// Interior-point conic solver with a bounded iteration budget.
#[derive(Clone, Debug)]
pub(crate) struct ConicBackend {
  pub max_iter: u32,
}

impl Default for ConicBackend {
  fn default() -> Self {
    Self { max_iter: 200 }
  }
}

/// `b - a·x`, where `a` is sparse.
#[derive(Clone, Debug, Default)]
struct Row {
  coeffs: Vec<(usize, f64)>,
  b: f64,
}

impl Row {
  fn new(coeffs: Vec<(usize, f64)>, b: f64) -> Self {
    Self { coeffs, b }
  }
}

/// Conic program under construction. The first `n` variables are the weights.
#[derive(Debug)]
struct ConicForm {
  n_vars: usize,
  q: Vec<f64>,
  p: Vec<(usize, usize, f64)>,
  zero: Vec<Row>,
  nonneg: Vec<Row>,
  soc: Vec<Vec<Row>>,
}

impl ConicForm {
  fn new(n: usize) -> Self {
    let mut form = Self {
      n_vars: n,
      q: vec![0.0; n],
      p: Vec::new(),
      zero: Vec::new(),
      nonneg: Vec::new(),
      soc: Vec::new(),
    };

    form
      .zero
      .push(Row::new((0..n).map(|i| (i, 1.0)).collect(), 1.0));
    for i in 0..n {
      form.nonneg.push(Row::new(vec![(i, -1.0)], 0.0));
    }
    form
  }

  fn add_var(&mut self, cost: f64) -> usize {
    self.q.push(cost);
    self.n_vars += 1;
    self.n_vars - 1
  }

  /// Adds `d ≥ |w - anchor|` and returns the indices of `d`.
  fn abs_deviation(&mut self, anchor: &Array1<f64>, cost: f64) -> Vec<usize> {
    anchor
      .iter()
      .enumerate()
      .map(|(i, &a)| {
        let d = self.add_var(cost);
        self.nonneg.push(Row::new(vec![(i, 1.0), (d, -1.0)], a));
        self.nonneg.push(Row::new(vec![(i, -1.0), (d, -1.0)], -a));
        d
      })
      .collect()
  }

  /// Adds `z` and `u ≥ max(0, L·w - z)`; returns the row `z + scale * sum(u)`.
  fn tail(&mut self, tail: &TailLoss, z_cost: f64) -> Vec<(usize, f64)> {
    let z = self.add_var(z_cost);
    let mut total = vec![(z, 1.0)];

    for row in tail.losses.rows() {
      let u = self.add_var(z_cost * tail.scale);
      let mut coeffs: Vec<(usize, f64)> = row
        .iter()
        .enumerate()
        .filter(|(_, v)| **v != 0.0)
        .map(|(j, &v)| (j, v))
        .collect();
      coeffs.push((z, -1.0));
      coeffs.push((u, -1.0));
      self.nonneg.push(Row::new(coeffs, 0.0));
      self.nonneg.push(Row::new(vec![(u, -1.0)], 0.0));
      total.push((u, tail.scale));
    }

    total
  }

  fn build(program: &SimplexProgram) -> Self {
    let n = program.n;
    let mut form = Self::new(n);

    for term in &program.terms {
      match term {
        Term::Reward(c) => {
          for (i, &ci) in c.iter().enumerate() {
            form.q[i] -= ci;
          }
        }
        Term::Quadratic { matrix, coef } => {
          for i in 0..n {
            for j in i..n {
              let v = 2.0 * coef * matrix[[i, j]];
              if v != 0.0 {
                form.p.push((i, j, v));
              }
            }
          }
        }
        Term::L2Distance { anchor, coef } => {
          if *coef == 0.0 {
            continue;
          }
          let t = form.add_var(*coef);
          let mut block = vec![Row::new(vec![(t, -1.0)], 0.0)];
          for (i, &a) in anchor.iter().enumerate() {
            block.push(Row::new(vec![(i, -1.0)], -a));
          }
          form.soc.push(block);
        }
        Term::L1Distance { anchor, coef } => {
          if *coef == 0.0 {
            continue;
          }
          form.abs_deviation(anchor, *coef);
        }
        Term::Tail(tail) => {
          form.tail(tail, 1.0);
        }
      }
    }

    for constraint in &program.constraints {
      match constraint {
        Constraint::GrossLeverage(cap) => {
          // w ≥ 0 already, so ‖w‖₁ = sum(w).
          form
            .nonneg
            .push(Row::new((0..n).map(|i| (i, 1.0)).collect(), *cap));
        }
        Constraint::Turnover { anchor, cap } => {
          let d = form.abs_deviation(anchor, 0.0);
          form
            .nonneg
            .push(Row::new(d.into_iter().map(|k| (k, 0.5)).collect(), *cap));
        }
        Constraint::Tail { tail, cap } => {
          let total = form.tail(tail, 0.0);
          form.nonneg.push(Row::new(total, *cap));
        }
      }
    }

    form
  }

  fn rows(&self) -> impl Iterator<Item = &Row> {
    self
      .zero
      .iter()
      .chain(self.nonneg.iter())
      .chain(self.soc.iter().flatten())
  }

  fn cones(&self) -> Vec<SupportedConeT<f64>> {
    let mut cones = vec![
      SupportedConeT::ZeroConeT(self.zero.len()),
      SupportedConeT::NonnegativeConeT(self.nonneg.len()),
    ];
    cones.extend(
      self
        .soc
        .iter()
        .map(|block| SupportedConeT::SecondOrderConeT(block.len())),
    );
    cones
  }

  fn a_matrix(&self) -> CscMatrix<f64> {
    let triplets: Vec<(usize, usize, f64)> = self
      .rows()
      .enumerate()
      .flat_map(|(r, row)| row.coeffs.iter().map(move |&(c, v)| (r, c, v)))
      .collect();
    let m = self.zero.len() + self.nonneg.len() + self.soc.iter().map(Vec::len).sum::<usize>();
    csc_from_triplets(m, self.n_vars, triplets)
  }

  fn b_vector(&self) -> Vec<f64> {
    self.rows().map(|row| row.b).collect()
  }

  fn p_matrix(&self) -> CscMatrix<f64> {
    csc_from_triplets(self.n_vars, self.n_vars, self.p.clone())
  }
}

/// Compressed-column matrix from `(row, col, value)`; duplicates are summed.
fn csc_from_triplets(m: usize, n: usize, mut triplets: Vec<(usize, usize, f64)>) -> CscMatrix<f64> {
  triplets.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));

  let mut colptr = vec![0usize; n + 1];
  let mut rowval: Vec<usize> = Vec::with_capacity(triplets.len());
  let mut nzval: Vec<f64> = Vec::with_capacity(triplets.len());
  let mut last: Option<(usize, usize)> = None;

  for (r, c, v) in triplets {
    if last == Some((r, c)) {
      if let Some(x) = nzval.last_mut() {
        *x += v;
      }
      continue;
    }
    rowval.push(r);
    nzval.push(v);
    colptr[c + 1] += 1;
    last = Some((r, c));
  }

  for c in 0..n {
    colptr[c + 1] += colptr[c];
  }

  CscMatrix::new(m, n, colptr, rowval, nzval)
}

impl ConvexSolverStrategy for ConicBackend {
  fn name(&self) -> &'static str {
    "conic"
  }

  fn solve(&self, program: &SimplexProgram) -> Result<Array1<f64>, GeneratorError> {
    let n = program.n;
    if n == 0 {
      return Ok(Array1::zeros(0));
    }

    let form = ConicForm::build(program);
    let p = form.p_matrix();
    let a = form.a_matrix();
    let b = form.b_vector();
    let cones = form.cones();

    let settings = DefaultSettingsBuilder::default()
      .max_iter(self.max_iter)
      .verbose(false)
      .build()
      .map_err(|e| GeneratorError::non_convergence(format!("invalid conic settings: {e}")))?;

    let mut solver = DefaultSolver::new(&p, &form.q, &a, &b, &cones, settings)
      .map_err(|e| GeneratorError::non_convergence(format!("conic setup failed: {e:?}")))?;
    solver.solve();

    let status = solver.solution.status;
    debug!(?status, n_vars = form.n_vars, "conic solve finished");

    match status {
      SolverStatus::Solved | SolverStatus::AlmostSolved => {
        Ok(Array1::from_iter(solver.solution.x.iter().take(n).copied()))
      }
      other => Err(GeneratorError::non_convergence(format!("conic status {other:?}"))),
    }
  }
}
