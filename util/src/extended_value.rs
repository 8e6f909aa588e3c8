use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
}

/// A wrapping counter type that can be extended to 64 bits.
pub trait WrappingCounter: Copy + sealed::Sealed {
    const MAX: u64;
    fn widen(self) -> u64;
}

impl WrappingCounter for u16 {
    const MAX: u64 = u16::MAX as u64;
    fn widen(self) -> u64 {
        self as u64
    }
}

impl WrappingCounter for u32 {
    const MAX: u64 = u32::MAX as u64;
    fn widen(self) -> u64 {
        self as u64
    }
}

/// Extends a wrapping 16- or 32-bit counter into a monotone 64-bit value.
///
/// A new value within `MAX / 10` of zero following one within `MAX / 10` of
/// the maximum counts as a rollover. The opposite swing right after a
/// rollover is attributed to the previous cycle without stepping back.
pub struct ExtendedValue<T: WrappingCounter> {
    increment: u64,
    rollover: u64,
    last: Option<u64>,
    _marker: PhantomData<T>,
}

impl<T: WrappingCounter> Default for ExtendedValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: WrappingCounter> ExtendedValue<T> {
    pub fn new() -> Self {
        ExtendedValue {
            increment: T::MAX + 1,
            rollover: T::MAX + 1,
            last: None,
            _marker: PhantomData,
        }
    }

    pub fn extend(&mut self, src: T) -> u64 {
        let src = src.widen();

        let last = match self.last {
            Some(last) => last,
            None => {
                self.last = Some(src);
                return self.rollover | src;
            }
        };

        let margin = T::MAX / 10;

        if last >= T::MAX - margin && src <= margin {
            // Rollover
            self.rollover += self.increment;
            self.last = Some(src);
            self.rollover | src
        } else if last <= margin && src >= T::MAX - margin {
            // We just had a rollover, and the new value wants to go backwards
            (self.rollover - self.increment) | src
        } else {
            self.last = Some(src);
            self.rollover | src
        }
    }

    pub fn get(&self) -> Option<u64> {
        self.last.map(|last| self.rollover | last)
    }
}

#[cfg(test)]
mod extended_value_test {
    use super::*;

    #[test]
    fn test_monotone_through_wrap() {
        let mut ev = ExtendedValue::<u16>::new();

        let mut prev = 0u64;
        for seq in (65530u32..65536).chain(0..5) {
            let ext = ev.extend(seq as u16);
            assert!(ext > prev, "seq {seq} extended to {ext}, prev {prev}");
            prev = ext;
        }

        // 65530..65535 then 0..4 must be contiguous
        let mut ev = ExtendedValue::<u16>::new();
        let base = ev.extend(65530);
        for (i, seq) in (65531u32..65536).chain(0..5).enumerate() {
            assert_eq!(ev.extend(seq as u16), base + i as u64 + 1);
        }
    }

    #[test]
    fn test_reorder_across_wrap_goes_to_previous_cycle() {
        let mut ev = ExtendedValue::<u16>::new();
        let near_end = ev.extend(65534);
        ev.extend(65535);
        let wrapped = ev.extend(1);
        assert!(wrapped > near_end);

        // A stale packet from before the wrap keeps its old extension
        assert_eq!(ev.extend(65534), near_end);
        // And does not disturb the current cycle
        assert_eq!(ev.extend(2), wrapped + 1);
    }

    #[test]
    fn test_u32_counter() {
        let mut ev = ExtendedValue::<u32>::new();
        let a = ev.extend(u32::MAX - 1);
        let b = ev.extend(1);
        assert!(b > a);
        assert_eq!(b - a, 3);
    }
}
