use crate::error::TrackError;
use nalgebra::DMatrix;

/* -----------------------------------------------------------------------------
 * lapjv.rs - Jonker-Volgenant linear assignment on a dense square matrix
 * ----------------------------------------------------------------------------- */

/// Working state of one solve. `x[i]` is the column of row `i`, `y[j]` the
/// row of column `j`, `v` the column duals.
struct Lapjv<'a> {
    cost: &'a DMatrix<f64>,
    n: usize,
    x: Vec<Option<usize>>,
    y: Vec<Option<usize>>,
    v: Vec<f64>,
}

impl<'a> Lapjv<'a> {
    fn new(cost: &'a DMatrix<f64>) -> Self {
        let n = cost.nrows();
        Self {
            cost,
            n,
            x: vec![None; n],
            y: vec![None; n],
            v: vec![0.0; n],
        }
    }

    #[inline(always)]
    fn reduced(&self, i: usize, j: usize) -> f64 {
        self.cost[(i, j)] - self.v[j]
    }

    /// Column reduction and reduction transfer. Returns the rows left free.
    fn column_reduction(&mut self) -> Vec<usize> {
        let n = self.n;
        for j in 0..n {
            let mut best_i = 0;
            let mut best = f64::INFINITY;
            for i in 0..n {
                let c = self.cost[(i, j)];
                if c < best {
                    best = c;
                    best_i = i;
                }
            }
            self.v[j] = best;
            self.y[j] = Some(best_i);
        }

        let mut unique = vec![true; n];
        for j in (0..n).rev() {
            let Some(i) = self.y[j] else { continue };
            if self.x[i].is_none() {
                self.x[i] = Some(j);
            } else {
                unique[i] = false;
                self.y[j] = None;
            }
        }

        let mut free_rows = Vec::with_capacity(n);
        for i in 0..n {
            match self.x[i] {
                None => free_rows.push(i),
                Some(j) if unique[i] => {
                    let min = (0..n)
                        .filter(|&j2| j2 != j)
                        .map(|j2| self.reduced(i, j2))
                        .fold(f64::INFINITY, f64::min);
                    if min.is_finite() {
                        self.v[j] -= min;
                    }
                }
                Some(_) => {}
            }
        }
        free_rows
    }

    /// One pass of augmenting row reduction. Returns the rows still free.
    fn augmenting_row_reduction(&mut self, mut free_rows: Vec<usize>) -> Vec<usize> {
        let n = self.n;
        let n_free = free_rows.len();
        let mut current = 0;
        let mut new_free = 0;
        let mut rr_cnt = 0;

        while current < n_free {
            rr_cnt += 1;
            let free_i = free_rows[current];
            current += 1;

            // lowest and second lowest reduced cost in the row
            let mut j1 = 0;
            let mut j2: Option<usize> = None;
            let mut u1 = self.reduced(free_i, 0);
            let mut u2 = f64::INFINITY;
            for j in 1..n {
                let c = self.reduced(free_i, j);
                if c < u2 {
                    if c >= u1 {
                        u2 = c;
                        j2 = Some(j);
                    } else {
                        u2 = u1;
                        u1 = c;
                        j2 = Some(j1);
                        j1 = j;
                    }
                }
            }

            let mut i0 = self.y[j1];
            let v1_new = self.v[j1] - (u2 - u1);
            let v1_lowers = v1_new < self.v[j1];

            if rr_cnt < current * n {
                if v1_lowers {
                    self.v[j1] = v1_new;
                } else if let (Some(_), Some(j2)) = (i0, j2) {
                    j1 = j2;
                    i0 = self.y[j2];
                }
                if let Some(i0) = i0 {
                    if v1_lowers {
                        current -= 1;
                        free_rows[current] = i0;
                    } else {
                        free_rows[new_free] = i0;
                        new_free += 1;
                    }
                }
            } else if let Some(i0) = i0 {
                free_rows[new_free] = i0;
                new_free += 1;
            }

            self.x[free_i] = Some(j1);
            self.y[j1] = Some(free_i);
        }

        free_rows.truncate(new_free);
        free_rows
    }

    /// Shortest augmenting path from `start_i` (Dijkstra over reduced costs).
    /// Fills `pred` and returns the free column the path ends in.
    fn find_path(&mut self, start_i: usize, pred: &mut [usize]) -> usize {
        let n = self.n;
        let mut cols: Vec<usize> = (0..n).collect();
        let mut d: Vec<f64> = (0..n).map(|j| self.reduced(start_i, j)).collect();
        pred.iter_mut().for_each(|p| *p = start_i);

        let mut lo = 0;
        let mut hi = 0;
        let mut n_ready = 0;
        let mut final_j = None;

        while final_j.is_none() {
            if lo == hi {
                n_ready = lo;
                hi = Self::collect_min(lo, &d, &mut cols);
                final_j = cols[lo..hi].iter().copied().filter(|&j| self.y[j].is_none()).last();
            }
            if final_j.is_none() {
                final_j = self.scan(&mut lo, &mut hi, &mut d, &mut cols, pred);
            }
        }

        let mind = d[cols[lo]];
        for &j in &cols[..n_ready] {
            self.v[j] += d[j] - mind;
        }
        final_j.unwrap_or_default()
    }

    /// Move every column at minimal distance to `cols[lo..hi]`, returning `hi`.
    fn collect_min(lo: usize, d: &[f64], cols: &mut [usize]) -> usize {
        let mut hi = lo + 1;
        let mut mind = d[cols[lo]];
        for k in hi..cols.len() {
            let j = cols[k];
            if d[j] <= mind {
                if d[j] < mind {
                    hi = lo;
                    mind = d[j];
                }
                cols[k] = cols[hi];
                cols[hi] = j;
                hi += 1;
            }
        }
        hi
    }

    /// Relax distances through the rows assigned to the columns in
    /// `cols[lo..hi]`. Returns a free column as soon as one is reached at
    /// minimal distance.
    fn scan(
        &self,
        plo: &mut usize,
        phi: &mut usize,
        d: &mut [f64],
        cols: &mut [usize],
        pred: &mut [usize],
    ) -> Option<usize> {
        let mut lo = *plo;
        let mut hi = *phi;

        while lo != hi {
            let j = cols[lo];
            lo += 1;
            let Some(i) = self.y[j] else { continue };
            let mind = d[j];
            let h = self.reduced(i, j) - mind;
            for k in hi..self.n {
                let j = cols[k];
                let cred_ij = self.reduced(i, j) - h;
                if cred_ij < d[j] {
                    d[j] = cred_ij;
                    pred[j] = i;
                    if cred_ij == mind {
                        if self.y[j].is_none() {
                            return Some(j);
                        }
                        cols[k] = cols[hi];
                        cols[hi] = j;
                        hi += 1;
                    }
                }
            }
        }
        *plo = lo;
        *phi = hi;
        None
    }

    fn augment(&mut self, free_rows: &[usize]) {
        let mut pred = vec![0; self.n];
        for &free_i in free_rows {
            let mut j = self.find_path(free_i, &mut pred);
            loop {
                let i = pred[j];
                self.y[j] = Some(i);
                let prev = self.x[i].replace(j);
                if i == free_i {
                    break;
                }
                match prev {
                    Some(prev) => j = prev,
                    None => break,
                }
            }
        }
    }
}

/// Solve the square assignment problem `cost`, returning the column of every
/// row. Entries must be finite.
pub(crate) fn lapjv(cost: &DMatrix<f64>) -> Result<Vec<usize>, TrackError> {
    let n = cost.nrows();
    if n == 0 {
        return Err(TrackError::Lapjv(format!(
            "cost.nrows() must be greater than 0, but cost.nrows() = {}",
            n
        )));
    }
    if n != cost.ncols() {
        return Err(TrackError::Lapjv(format!(
            "cost must be square, but got {}x{}",
            n,
            cost.ncols()
        )));
    }
    if cost.iter().any(|c| !c.is_finite()) {
        return Err(TrackError::Lapjv("cost must be finite".to_string()));
    }
    if n == 1 {
        return Ok(vec![0]);
    }

    let mut solver = Lapjv::new(cost);
    let mut free_rows = solver.column_reduction();
    let mut passes = 0;
    while !free_rows.is_empty() && passes < 2 {
        free_rows = solver.augmenting_row_reduction(free_rows);
        passes += 1;
    }
    if !free_rows.is_empty() {
        solver.augment(&free_rows);
    }

    solver
        .x
        .iter()
        .enumerate()
        .map(|(i, j)| {
            j.ok_or_else(|| {
                TrackError::Lapjv(format!("row {} left unassigned", i))
            })
        })
        .collect()
}
