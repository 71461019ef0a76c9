//! Stage execution units.
//!
//! The graph holds every stage behind the [`Stage`] trait. Concrete stages keep
//! the static types of their inputs and output, so a stage recovers typed
//! values from the [`ResultStore`] exactly once per read, at the point where
//! the type is already known from its ports.

use crate::{Error, Port, Result, ResultStore, StageError, StageKey, StageValue};
use std::marker::PhantomData;
use tracing::trace;

/// A unit of work in the dependency graph.
pub(crate) trait Stage: Send + Sync {
    /// Key of this stage.
    fn key(&self) -> &str;

    /// Keys of the stages this one consumes, in argument order.
    fn upstream(&self) -> &[StageKey];

    /// Read inputs from `store`, invoke the callable and store its output.
    fn run(&self, store: &ResultStore) -> Result<()>;
}

mod sealed {
    pub trait Sealed {}
}

/// Upstream ports of a stage with one or more inputs.
///
/// Implemented for a single [`Port<A>`] (the callable receives an `A`) and for
/// tuples of up to six ports (the callable receives a tuple of values). The
/// trait is sealed: graph edges come from [`keys`](Self::keys), so every key
/// read by [`fetch`](Self::fetch) must be listed there.
///
/// ```compile_fail
/// use stagegraph_pipeline::{Inputs, Result, ResultStore, StageKey};
///
/// struct Unlisted;
///
/// impl Inputs for Unlisted {
///     type Values = i32;
///
///     fn keys(&self) -> Vec<StageKey> {
///         Vec::new()
///     }
///
///     fn fetch(&self, store: &ResultStore) -> Result<i32> {
///         store.get::<i32>("elsewhere")
///     }
/// }
/// ```
pub trait Inputs: sealed::Sealed + Send + Sync + 'static {
    /// Values handed to the stage callable.
    type Values: Send + 'static;

    /// Keys of the upstream stages, in argument order.
    fn keys(&self) -> Vec<StageKey>;

    /// Read the upstream values from the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStage`] if an upstream value is missing and
    /// [`Error::TypeMismatch`] if one has an unexpected type.
    fn fetch(&self, store: &ResultStore) -> Result<Self::Values>;
}

impl<A: StageValue> sealed::Sealed for Port<A> {}

impl<A: StageValue> Inputs for Port<A> {
    type Values = A;

    fn keys(&self) -> Vec<StageKey> {
        vec![self.key().to_string()]
    }

    fn fetch(&self, store: &ResultStore) -> Result<A> {
        store.get::<A>(self.key())
    }
}

macro_rules! impl_inputs_for_tuple {
    ($($idx:tt $ty:ident),+) => {
        impl<$($ty: StageValue),+> sealed::Sealed for ($(Port<$ty>,)+) {}

        impl<$($ty: StageValue),+> Inputs for ($(Port<$ty>,)+) {
            type Values = ($($ty,)+);

            fn keys(&self) -> Vec<StageKey> {
                vec![$(self.$idx.key().to_string()),+]
            }

            fn fetch(&self, store: &ResultStore) -> Result<Self::Values> {
                Ok(($(store.get::<$ty>(self.$idx.key())?,)+))
            }
        }
    };
}

impl_inputs_for_tuple!(0 A);
impl_inputs_for_tuple!(0 A, 1 B);
impl_inputs_for_tuple!(0 A, 1 B, 2 C);
impl_inputs_for_tuple!(0 A, 1 B, 2 C, 3 D);
impl_inputs_for_tuple!(0 A, 1 B, 2 C, 3 D, 4 E);
impl_inputs_for_tuple!(0 A, 1 B, 2 C, 3 D, 4 E, 5 F);

/// Stage without inputs.
pub(crate) struct SourceStage<F, O> {
    key: StageKey,
    func: F,
    _output: PhantomData<fn() -> O>,
}

impl<F, O> SourceStage<F, O> {
    pub(crate) fn new(key: StageKey, func: F) -> Self {
        Self {
            key,
            func,
            _output: PhantomData,
        }
    }
}

impl<F, O> Stage for SourceStage<F, O>
where
    F: Fn() -> std::result::Result<O, StageError> + Send + Sync,
    O: StageValue,
{
    fn key(&self) -> &str {
        &self.key
    }

    fn upstream(&self) -> &[StageKey] {
        &[]
    }

    fn run(&self, store: &ResultStore) -> Result<()> {
        trace!(stage = %self.key, "Running source stage");
        let output = (self.func)().map_err(|e| Error::from_stage(&self.key, e))?;
        store.insert(&self.key, output);
        Ok(())
    }
}

/// Stage consuming one or more upstream outputs.
pub(crate) struct DerivedStage<I, F, O> {
    key: StageKey,
    upstream: Vec<StageKey>,
    inputs: I,
    func: F,
    _output: PhantomData<fn() -> O>,
}

impl<I: Inputs, F, O> DerivedStage<I, F, O> {
    pub(crate) fn new(key: StageKey, inputs: I, func: F) -> Self {
        Self {
            key,
            upstream: inputs.keys(),
            inputs,
            func,
            _output: PhantomData,
        }
    }
}

impl<I, F, O> Stage for DerivedStage<I, F, O>
where
    I: Inputs,
    F: Fn(I::Values) -> std::result::Result<O, StageError> + Send + Sync,
    O: StageValue,
{
    fn key(&self) -> &str {
        &self.key
    }

    fn upstream(&self) -> &[StageKey] {
        &self.upstream
    }

    fn run(&self, store: &ResultStore) -> Result<()> {
        trace!(stage = %self.key, inputs = self.upstream.len(), "Running stage");
        let values = self.inputs.fetch(store)?;
        let output = (self.func)(values).map_err(|e| Error::from_stage(&self.key, e))?;
        store.insert(&self.key, output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_stage_stores_output() {
        let store = ResultStore::new();
        let stage = SourceStage::new("src".to_string(), || Ok::<_, StageError>(5_i32));
        stage.run(&store).unwrap();
        assert_eq!(store.get::<i32>("src").unwrap(), 5);
        assert!(stage.upstream().is_empty());
    }

    #[test]
    fn test_derived_stage_reads_tuple_inputs() {
        let store = ResultStore::new();
        store.insert("a", 2_i32);
        store.insert("b", "x".to_string());
        let inputs: (Port<i32>, Port<String>) = (Port::new("a"), Port::new("b"));
        let stage = DerivedStage::new("c".to_string(), inputs, |(n, s): (i32, String)| {
            Ok::<_, StageError>(s.repeat(usize::try_from(n).unwrap_or(0)))
        });

        assert_eq!(stage.upstream(), ["a".to_string(), "b".to_string()]);
        stage.run(&store).unwrap();
        assert_eq!(store.get::<String>("c").unwrap(), "xx");
    }

    #[test]
    fn test_derived_stage_reports_type_mismatch() {
        let store = ResultStore::new();
        store.insert("a", "not a number".to_string());
        let stage = DerivedStage::new("b".to_string(), Port::<i32>::new("a"), |x: i32| {
            Ok::<_, StageError>(x + 1)
        });
        let err = stage.run(&store).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { stage, .. } if stage == "a"));
        assert!(!store.contains("b"));
    }

    #[test]
    fn test_failing_callable_is_tagged_with_stage_key() {
        let store = ResultStore::new();
        let stage = SourceStage::new("src".to_string(), || {
            Err::<i32, _>(StageError::failed("boom"))
        });
        let err = stage.run(&store).unwrap_err();
        assert!(matches!(err, Error::Runtime { stage, message } if stage == "src" && message == "boom"));
    }
}
