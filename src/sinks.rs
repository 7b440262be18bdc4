//! Externally owned output containers
//!
//! The engine never owns the data it logs. Callers hand in sinks implementing
//! a small capability set (append a float, append a crossing, append a
//! matrix, read back), and the in-memory implementations here are cheaply
//! cloneable handles over shared storage so the caller keeps a reading handle
//! while the engine appends.

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::DMatrix;
use thiserror::Error;

/// Error raised by a sink that rejects an append.
#[derive(Debug, Clone, Error)]
#[error("sink rejected append: {0}")]
pub struct SinkError(pub String);

/// A sequence of floats the engine can append to.
///
/// `len` and `value_at` exist so the driver can inspect a log it is about to
/// append to (e.g. to decide whether a dynamic-mode run continues an
/// existing log).
pub trait FloatSink {
    fn append(&mut self, value: f64) -> Result<(), SinkError>;
    fn len(&self) -> usize;
    fn value_at(&self, index: usize) -> Option<f64>;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A sequence of root crossings `(time, direction)` with direction in {-1, +1}.
pub trait CrossingSink {
    fn append_crossing(&mut self, t: f64, direction: i32) -> Result<(), SinkError>;
}

/// A sequence of sensitivity matrix snapshots.
pub trait MatrixSink {
    fn append_matrix(&mut self, matrix: &DMatrix<f64>) -> Result<(), SinkError>;
}

/// Shared in-memory float series.
///
/// Cloning produces another handle onto the same storage.
#[derive(Debug, Clone, Default)]
pub struct Series {
    data: Rc<RefCell<Vec<f64>>>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        Self {
            data: Rc::new(RefCell::new(values)),
        }
    }

    /// Copy of the recorded values, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.data.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn at(&self, index: usize) -> Option<f64> {
        self.data.borrow().get(index).copied()
    }

    pub fn last(&self) -> Option<f64> {
        self.data.borrow().last().copied()
    }
}

impl FloatSink for Series {
    fn append(&mut self, value: f64) -> Result<(), SinkError> {
        self.data.borrow_mut().push(value);
        Ok(())
    }

    fn len(&self) -> usize {
        Series::len(self)
    }

    fn value_at(&self, index: usize) -> Option<f64> {
        self.at(index)
    }
}

/// Shared in-memory list of root crossings.
#[derive(Debug, Clone, Default)]
pub struct CrossingLog {
    data: Rc<RefCell<Vec<(f64, i32)>>>,
}

impl CrossingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(f64, i32)> {
        self.data.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CrossingSink for CrossingLog {
    fn append_crossing(&mut self, t: f64, direction: i32) -> Result<(), SinkError> {
        self.data.borrow_mut().push((t, direction));
        Ok(())
    }
}

/// Shared in-memory list of sensitivity matrix snapshots.
#[derive(Debug, Clone, Default)]
pub struct MatrixLog {
    data: Rc<RefCell<Vec<DMatrix<f64>>>>,
}

impl MatrixLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matrices(&self) -> Vec<DMatrix<f64>> {
        self.data.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MatrixSink for MatrixLog {
    fn append_matrix(&mut self, matrix: &DMatrix<f64>) -> Result<(), SinkError> {
        self.data.borrow_mut().push(matrix.clone());
        Ok(())
    }
}

/// Shared fixed-length float vector, used for in/out arguments of a run
/// (initial and final state, final bound variables).
#[derive(Debug, Clone, Default)]
pub struct SharedVec {
    data: Rc<RefCell<Vec<f64>>>,
}

impl SharedVec {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            data: Rc::new(RefCell::new(values)),
        }
    }

    pub fn snapshot(&self) -> Vec<f64> {
        self.data.borrow().clone()
    }

    pub fn assign(&self, values: &[f64]) {
        let mut data = self.data.borrow_mut();
        data.clear();
        data.extend_from_slice(values);
    }

    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn at(&self, index: usize) -> Option<f64> {
        self.data.borrow().get(index).copied()
    }
}

/// Shared matrix of floats (rows of equal length), used for the in/out state
/// sensitivity argument of a run.
#[derive(Debug, Clone, Default)]
pub struct SharedMatrix {
    data: Rc<RefCell<Vec<Vec<f64>>>>,
}

impl SharedMatrix {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self {
            data: Rc::new(RefCell::new(rows)),
        }
    }

    pub fn snapshot(&self) -> Vec<Vec<f64>> {
        self.data.borrow().clone()
    }

    pub fn assign(&self, rows: &[Vec<f64>]) {
        let mut data = self.data.borrow_mut();
        data.clear();
        data.extend(rows.iter().cloned());
    }

    pub fn n_rows(&self) -> usize {
        self.data.borrow().len()
    }
}
