/// Declares a code point type for a header or record field.
///
/// The type is a transparent wrapper around the raw integer, so any value read off the wire can be
/// represented. Named values become associated constants and render by name; anything else
/// renders as its number.
macro_rules! wire_enum {
    (
        $( #[$attrs:meta] )*
        $v:vis enum $name:ident: $raw:ty {
            $(
                $( #[$variant_attrs:meta] )*
                $variant:ident = $value:expr
            ),+
            $(,)?
        }
    ) => {
        $( #[$attrs] )*
        #[derive(Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
        #[repr(transparent)]
        $v struct $name(pub(crate) $raw);

        #[allow(unreachable_patterns)]
        impl $name {
            $(
                $( #[$variant_attrs] )*
                $v const $variant: Self = Self($value);
            )+

            /// Returns the mnemonic of this value, if it has one.
            $v fn name(self) -> Option<&'static str> {
                match self {
                    $( Self::$variant => Some(stringify!($variant)), )+
                    _ => None,
                }
            }

            #[inline]
            $v fn to_raw(self) -> $raw {
                self.0
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "{}({:#x})", stringify!($name), self.0),
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "{}", self.0),
                }
            }
        }
    };
}
