//! Defines helper macros for generating domain port error enums.

macro_rules! define_port_error {
    (@ctor $variant:ident) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]() -> Self {
                Self::$variant
            }
        }
    };

    (@ctor $variant:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        define_port_error!(@ctor_impl $variant () () $( $field : $ty, )*);
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) ) => {
        ::paste::paste! {
            pub fn [<$variant:snake>]($($params)*) -> Self {
                Self::$variant { $($inits)* }
            }
        }
    };

    (@ctor_impl $variant:ident ($($params:tt)*) ($($inits:tt)*) $field:ident : $ty:ty, $($rest:tt)*) => {
        define_port_error!(
            @ctor_impl
            $variant
            ($($params)* $field: impl Into<$ty>,)
            ($($inits)* $field: $field.into(),)
            $($rest)*
        );
    };
    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( { $($field:ident : $ty:ty),* $(,)? } )? => $message:expr
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant $( { $($field : $ty),* } )?,
            )*
        }

        impl $name {
            $(
                define_port_error!(@ctor $variant $( { $($field : $ty),* } )?);
            )*
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    //! Regression coverage for generated constructors.
    use std::time::Duration;

    define_port_error! {
        pub enum ExamplePortError {
            Unit => "unit",
            Message { message: String } => "message: {message}",
            Status { status: u16 } => "status: {status}",
            Hint { message: String, retry_after: Option<Duration> } => "hint: {message}",
        }
    }

    #[test]
    fn unit_variants_get_snake_case_constructors() {
        assert_eq!(ExamplePortError::unit(), ExamplePortError::Unit);
    }

    #[test]
    fn constructors_accept_str_for_string_fields() {
        let err = ExamplePortError::message("hello");
        assert_eq!(err.to_string(), "message: hello");
    }

    #[test]
    fn constructors_preserve_non_string_types() {
        let err = ExamplePortError::status(429_u16);
        assert_eq!(err.to_string(), "status: 429");
    }

    #[test]
    fn optional_fields_accept_plain_values() {
        let err = ExamplePortError::hint("slow", Duration::from_secs(2));
        assert_eq!(
            err,
            ExamplePortError::Hint {
                message: "slow".to_owned(),
                retry_after: Some(Duration::from_secs(2)),
            }
        );
    }
}
