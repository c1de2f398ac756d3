//! Product storage port and its in-memory implementation.

use crate::error::ProductError;
use crate::product::Product;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Product storage.
///
/// Codes are unique: writes that would give two products the same code fail
/// with [`ProductError::DuplicateCode`].
pub trait ProductRepository: Send + Sync {
    /// Insert a new product.
    ///
    /// # Errors
    ///
    /// - [`ProductError::DuplicateCode`] if the code is taken
    /// - [`ProductError::Repository`] if storage fails
    fn insert(&self, product: &Product) -> impl Future<Output = Result<Product, ProductError>> + Send;

    /// Replace an existing product.
    ///
    /// # Errors
    ///
    /// - [`ProductError::NotFound`] if no product has this id
    /// - [`ProductError::DuplicateCode`] if another product has the code
    /// - [`ProductError::Repository`] if storage fails
    fn replace(&self, product: &Product) -> impl Future<Output = Result<Product, ProductError>> + Send;

    /// Remove a product and return its last state.
    ///
    /// # Errors
    ///
    /// - [`ProductError::NotFound`] if no product has this id
    /// - [`ProductError::Repository`] if storage fails
    fn remove(&self, id: &str) -> impl Future<Output = Result<Product, ProductError>> + Send;

    /// Look up a product.
    ///
    /// # Errors
    ///
    /// - [`ProductError::NotFound`] if no product has this id
    /// - [`ProductError::Repository`] if storage fails
    fn find(&self, id: &str) -> impl Future<Output = Result<Product, ProductError>> + Send;
}

/// In-memory [`ProductRepository`].
///
/// [`set_unavailable`](Self::set_unavailable) makes every call fail with
/// [`ProductError::Repository`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductRepository {
    products: Arc<Mutex<HashMap<String, Product>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryProductRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated storage outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.lock().map_or(0, |products| products.len())
    }

    /// Whether the repository holds no products.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_products<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Product>) -> Result<T, ProductError>,
    ) -> Result<T, ProductError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProductError::Repository("product store unavailable".to_string()));
        }
        let mut products = self
            .products
            .lock()
            .map_err(|_| ProductError::Repository("product store lock poisoned".to_string()))?;
        f(&mut products)
    }
}

fn code_taken(products: &HashMap<String, Product>, product: &Product) -> bool {
    products
        .values()
        .any(|existing| existing.code == product.code && existing.id != product.id)
}

impl ProductRepository for InMemoryProductRepository {
    fn insert(&self, product: &Product) -> impl Future<Output = Result<Product, ProductError>> + Send {
        let result = self.with_products(|products| {
            if code_taken(products, product) {
                return Err(ProductError::DuplicateCode {
                    id: None,
                    code: product.code.clone(),
                });
            }
            products.insert(product.id.clone(), product.clone());
            Ok(product.clone())
        });
        async move { result }
    }

    fn replace(&self, product: &Product) -> impl Future<Output = Result<Product, ProductError>> + Send {
        let result = self.with_products(|products| {
            if !products.contains_key(&product.id) {
                return Err(ProductError::NotFound {
                    id: product.id.clone(),
                });
            }
            if code_taken(products, product) {
                return Err(ProductError::DuplicateCode {
                    id: Some(product.id.clone()),
                    code: product.code.clone(),
                });
            }
            products.insert(product.id.clone(), product.clone());
            Ok(product.clone())
        });
        async move { result }
    }

    fn remove(&self, id: &str) -> impl Future<Output = Result<Product, ProductError>> + Send {
        let result = self.with_products(|products| {
            products
                .remove(id)
                .ok_or_else(|| ProductError::NotFound { id: id.to_string() })
        });
        async move { result }
    }

    fn find(&self, id: &str) -> impl Future<Output = Result<Product, ProductError>> + Send {
        let result = self.with_products(|products| {
            products
                .get(id)
                .cloned()
                .ok_or_else(|| ProductError::NotFound { id: id.to_string() })
        });
        async move { result }
    }
}
