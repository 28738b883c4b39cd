use std::sync::Arc;

pub trait Predicate<T>: Send + Sync {
    fn test(&self, item: &T) -> bool;

    fn and<P>(self, other: P) -> And<T, Self, P>
    where
        Self: Sized,
        P: Predicate<T>,
    {
        And {
            left: self,
            right: other,
            _phantom: std::marker::PhantomData,
        }
    }

    fn or<P>(self, other: P) -> Or<T, Self, P>
    where
        Self: Sized,
        P: Predicate<T>,
    {
        Or {
            left: self,
            right: other,
            _phantom: std::marker::PhantomData,
        }
    }

    fn not(self) -> Not<T, Self>
    where
        Self: Sized,
    {
        Not {
            inner: self,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T> Predicate<T> for Arc<dyn Predicate<T>>
where
    T: Send + Sync,
{
    fn test(&self, item: &T) -> bool {
        (**self).test(item)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysTrue;

impl<T> Predicate<T> for AlwaysTrue
where
    T: Send + Sync,
{
    fn test(&self, _item: &T) -> bool {
        true
    }
}

pub struct And<T, L, R> {
    left: L,
    right: R,
    _phantom: std::marker::PhantomData<T>,
}

impl<T, L, R> Predicate<T> for And<T, L, R>
where
    T: Send + Sync,
    L: Predicate<T>,
    R: Predicate<T>,
{
    fn test(&self, item: &T) -> bool {
        self.left.test(item) && self.right.test(item)
    }
}

pub struct Or<T, L, R> {
    left: L,
    right: R,
    _phantom: std::marker::PhantomData<T>,
}

impl<T, L, R> Predicate<T> for Or<T, L, R>
where
    T: Send + Sync,
    L: Predicate<T>,
    R: Predicate<T>,
{
    fn test(&self, item: &T) -> bool {
        self.left.test(item) || self.right.test(item)
    }
}

pub struct Not<T, P> {
    inner: P,
    _phantom: std::marker::PhantomData<T>,
}

impl<T, P> Predicate<T> for Not<T, P>
where
    T: Send + Sync,
    P: Predicate<T>,
{
    fn test(&self, item: &T) -> bool {
        !self.inner.test(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestItem {
        value: i64,
    }

    struct AboveTen;

    impl Predicate<TestItem> for AboveTen {
        fn test(&self, item: &TestItem) -> bool {
            item.value > 10
        }
    }

    #[test]
    fn test_predicate_and() {
        let item = TestItem { value: 15 };

        let pred = AboveTen.and(AlwaysTrue);
        assert!(pred.test(&item));
    }

    #[test]
    fn test_predicate_or() {
        let item = TestItem { value: 5 };

        let pred = AboveTen.or(AboveTen);
        assert!(!pred.test(&item));
    }

    #[test]
    fn test_predicate_not() {
        let item = TestItem { value: 5 };

        let pred = AboveTen.not();
        assert!(pred.test(&item));
    }

    #[test]
    fn test_arc_dyn_predicate() {
        let pred: Arc<dyn Predicate<TestItem>> = Arc::new(AboveTen);
        assert!(pred.test(&TestItem { value: 11 }));
        assert!(!pred.not().test(&TestItem { value: 11 }));
    }
}
