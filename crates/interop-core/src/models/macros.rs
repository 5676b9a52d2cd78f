/// Declares a strict, versioned Data Model.
///
/// The generated struct carries the `schema_name` / `schema_version` header,
/// rejects unknown fields, derives serde + schemars, and gets a positional
/// `new(..)` constructor taking the declared fields in order.
///
/// Fields that hold other Data Models (directly, in an `Option` or in a
/// `Vec`) are listed with `nested = [field, ..];` so their constraints run
/// too, with errors reported under the field's path. Constraints serde
/// cannot express go in a function named after the struct body with
/// `check = path;`. Both run on every validation.
///
/// Crates invoking this macro need `serde` and `schemars` as dependencies,
/// since the derives expand to paths into both.
///
/// ```
/// use interop_core::data_model;
/// use interop_core::models::DataModel;
///
/// data_model! {
///     /// A single integer.
///     pub struct IntModel {
///         pub value: i64,
///     }
/// }
///
/// let model = IntModel::new(3);
/// assert_eq!(model.schema_name(), "unknown");
/// assert_eq!(model.schema_version().get(), 1);
/// ```
#[macro_export]
macro_rules! data_model {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
        $(nested = [$($nested:ident),* $(,)?];)?
        $(check = $check:path;)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, ::serde::Serialize, ::serde::Deserialize, ::schemars::JsonSchema)]
        #[serde(deny_unknown_fields)]
        $vis struct $name {
            /// Name of the schema this model conforms to.
            #[serde(default)]
            pub schema_name: $crate::models::SchemaName,
            /// Version of the schema this model conforms to.
            #[serde(default)]
            pub schema_version: $crate::models::SchemaVersion,
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $name {
            #[allow(clippy::too_many_arguments, clippy::new_without_default)]
            pub fn new($($field: $ty),*) -> Self {
                Self {
                    schema_name: ::std::default::Default::default(),
                    schema_version: ::std::default::Default::default(),
                    $($field,)*
                }
            }

            /// Replaces the schema header.
            pub fn with_schema(
                mut self,
                name: impl Into<$crate::models::SchemaName>,
                version: $crate::models::SchemaVersion,
            ) -> Self {
                self.schema_name = name.into();
                self.schema_version = version;
                self
            }
        }

        impl $crate::models::DataModel for $name {
            fn schema_name(&self) -> &str {
                self.schema_name.as_str()
            }

            fn schema_version(&self) -> $crate::models::SchemaVersion {
                self.schema_version
            }

            fn check(&self) -> ::std::result::Result<(), $crate::error::ValidationError> {
                #[allow(unused_mut)]
                let mut errors = ::std::vec::Vec::new();
                $($(
                    if let ::std::result::Result::Err(err) =
                        $crate::models::NestedModel::check_nested(&self.$nested)
                    {
                        errors.extend(err.nested(stringify!($nested)).errors);
                    }
                )*)?
                $(
                    if let ::std::result::Result::Err(err) = $check(self) {
                        errors.extend(err.errors);
                    }
                )?
                if errors.is_empty() {
                    ::std::result::Result::Ok(())
                } else {
                    ::std::result::Result::Err($crate::error::ValidationError::new(stringify!($name), errors))
                }
            }
        }
    };
}
