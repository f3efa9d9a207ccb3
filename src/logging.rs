//! `eel_event!`: structured records keyed by a stable `event` name.
//!
//! Every record carries `tenant`, and records raised while a handler is in
//! play also carry `handler`, so a tenant's traffic can be followed through
//! ingress, pipeline and dispatcher logs alike. Remaining fields are
//! captured with their `Display` form.

#[macro_export]
macro_rules! eel_event {
    ($level:ident, $target:expr, $event:expr, tenant = $tenant:expr, handler = $handler:expr $(, $field:ident = $value:expr )* $(,)?) => {
        $crate::eel_event!(@emit $level, $target, $event, [tenant = $tenant, handler = $handler] $($field = $value),*)
    };
    ($level:ident, $target:expr, $event:expr, tenant = $tenant:expr $(, $field:ident = $value:expr )* $(,)?) => {
        $crate::eel_event!(@emit $level, $target, $event, [tenant = $tenant] $($field = $value),*)
    };
    (@emit $level:ident, $target:expr, $event:expr, [$($key:ident = $keyed:expr),+] $($field:ident = $value:expr),*) => {
        tracing::$level!(
            target: $target,
            event = $event,
            $($key = $keyed,)+
            $($field = %$value,)*
        )
    };
}
