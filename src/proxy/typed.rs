// src/proxy/typed.rs

/// Declares a typed view over an environment's remote methods.
///
/// Each declared method becomes an async method on
/// [`EnvironmentProxy`](crate::EnvironmentProxy) that sends its parameters as
/// keyword arguments (in declaration order) through
/// [`invoke`](crate::EnvironmentProxy::invoke) and deserializes the result.
/// A parameter named `timeout` bounds the call instead of being forwarded.
///
/// ```ignore
/// envfleet::env_methods! {
///     pub trait Affine {
///         fn evaluate(task_type: String, num_samples: u32) -> serde_json::Value;
///     }
/// }
///
/// let score = env.evaluate("sat".into(), 5).await?;
/// ```
#[macro_export]
macro_rules! env_methods {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident {
            $(
                $(#[$fmeta:meta])*
                fn $method:ident ( $( $arg:ident : $ty:ty ),* $(,)? ) -> $ret:ty ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[$crate::__private::async_trait]
        $vis trait $name {
            $(
                $(#[$fmeta])*
                async fn $method(&self $(, $arg: $ty)*) -> $crate::Result<$ret>;
            )*
        }

        #[$crate::__private::async_trait]
        impl $name for $crate::EnvironmentProxy {
            $(
                async fn $method(&self $(, $arg: $ty)*) -> $crate::Result<$ret> {
                    #[allow(unused_mut)]
                    let mut call = $crate::CallArgs::new();
                    $(
                        call.kwargs.insert(
                            ::std::string::String::from(::std::stringify!($arg)),
                            $crate::__private::serde_json::to_value(&$arg)?,
                        );
                    )*
                    let value = self.invoke(::std::stringify!($method), call).await?;
                    ::std::result::Result::Ok($crate::__private::serde_json::from_value(value)?)
                }
            )*
        }
    };
}
