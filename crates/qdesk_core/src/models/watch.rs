//! Watched expressions.

use crate::error::QdeskError;

use super::value::Value;

/// An expression re-evaluated after every query.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchedExpression {
    expression: String,
    last_result: Option<Value>,
}

impl WatchedExpression {
    /// Create an expression that has not been evaluated yet.
    pub fn new(expression: impl Into<String>) -> Self {
        Self { expression: expression.into(), last_result: None }
    }

    /// The expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Result of the last evaluation, `None` if it failed or has not run.
    pub fn last_result(&self) -> Option<&Value> {
        self.last_result.as_ref()
    }

    pub(crate) fn set_expression(&mut self, expression: impl Into<String>) {
        self.expression = expression.into();
        self.last_result = None;
    }

    pub(crate) fn set_last_result(&mut self, result: Option<Value>) {
        self.last_result = result;
    }
}

/// Ordered, index-addressed list of watched expressions.
#[derive(Debug, Clone, Default)]
pub struct WatchList {
    items: Vec<WatchedExpression>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an expression.
    pub fn add(&mut self, expression: impl Into<String>) {
        self.items.push(WatchedExpression::new(expression));
    }

    /// Replace the expression at `index`.
    pub fn set(&mut self, index: usize, expression: impl Into<String>) -> Result<(), QdeskError> {
        let len = self.items.len();
        let item = self.items.get_mut(index).ok_or(QdeskError::index_not_found(index, len))?;
        item.set_expression(expression);
        Ok(())
    }

    /// Remove and return the expression at `index`.
    pub fn remove(&mut self, index: usize) -> Result<WatchedExpression, QdeskError> {
        if index >= self.items.len() {
            return Err(QdeskError::index_not_found(index, self.items.len()));
        }
        Ok(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn get(&self, index: usize) -> Option<&WatchedExpression> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchedExpression> {
        self.items.iter()
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut WatchedExpression> {
        self.items.get_mut(index)
    }

    /// Reset every result to `None`.
    pub(crate) fn reset_results(&mut self) {
        for item in &mut self.items {
            item.set_last_result(None);
        }
    }

    /// Snapshot of the list.
    pub fn to_vec(&self) -> Vec<WatchedExpression> {
        self.items.clone()
    }
}
