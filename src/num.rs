//! Big-endian integers that can be embedded in `#[repr(C)]` wire structures.

macro_rules! big_endian {
    ($( $(#[$attr:meta])* $name:ident($int:ty); )+) => {$(
        $(#[$attr])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(transparent)]
        pub(crate) struct $name($int);

        impl $name {
            /// Returns the value in native byte order.
            #[inline]
            pub(crate) fn get(self) -> $int {
                <$int>::from_be(self.0)
            }
        }

        impl From<$int> for $name {
            #[inline]
            fn from(value: $int) -> Self {
                Self(value.to_be())
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Debug::fmt(&self.get(), f)
            }
        }
    )+};
}

big_endian! {
    /// A `u16` stored in network byte order.
    U16(u16);
    U32(u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_byte_order() {
        assert_eq!(bytemuck::bytes_of(&U16::from(0x1234)), [0x12, 0x34]);
        assert_eq!(
            bytemuck::bytes_of(&U32::from(0xdead_beef)),
            [0xde, 0xad, 0xbe, 0xef]
        );
        assert_eq!(bytemuck::pod_read_unaligned::<U16>(&[0, 12]).get(), 12);
        assert_eq!(format!("{:?}", U32::from(5353)), "5353");
    }
}
