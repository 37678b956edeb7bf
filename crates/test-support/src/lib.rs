//! Test attributes for the Havoc workspace.
//!
//! Both attributes run the test body on a dedicated thread bounded by a
//! timeout and install a `tracing-subscriber` test writer first, so crates
//! using them need `tracing-subscriber` (with `env-filter`) as a
//! dev-dependency. `HAVOC_TEST_LOG` sets the filter, `HAVOC_TEST_TIMEOUT_SCALE`
//! multiplies every timeout on slow machines.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Expr, ExprLit, ItemFn, Lit, LitInt, MetaNameValue};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// `#[async_test]`, `#[async_test(10)]` or `#[async_test(secs = 10)]` on an
/// `async fn`; the body runs on a current-thread tokio runtime.
#[proc_macro_attribute]
pub fn async_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let timeout_secs = match parse_timeout(attr.into()) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(&sig.ident, "async_test can only be applied to async functions")
            .to_compile_error()
            .into();
    }
    sig.asyncness = None;

    let attrs = strip_test_attributes(attrs);
    let prelude = prelude(timeout_secs);

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #prelude
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        tokio::time::timeout(timeout_duration, async move #block)
                            .await
                            .expect("test timed out");
                    });
                }));
                let _ = sender.send(result);
            });
            havoc_await_test_result(receiver, timeout_duration);
        }
    })
}

/// Synchronous counterpart of [`async_test`].
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let timeout_secs = match parse_timeout(attr.into()) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout expects a synchronous test function; use async_test instead",
        )
        .to_compile_error()
        .into();
    }

    let attrs = strip_test_attributes(attrs);
    let prelude = prelude(timeout_secs);

    TokenStream::from(quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            #prelude
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #block));
                let _ = sender.send(result);
            });
            havoc_await_test_result(receiver, timeout_duration);
        }
    })
}

fn prelude(timeout_secs: u64) -> TokenStream2 {
    quote! {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("HAVOC_TEST_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init();
        let scale: u64 = std::env::var("HAVOC_TEST_TIMEOUT_SCALE")
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .filter(|scale| *scale > 0)
            .unwrap_or(1);
        let timeout_duration = std::time::Duration::from_secs(#timeout_secs * scale);

        fn havoc_await_test_result(
            receiver: std::sync::mpsc::Receiver<std::thread::Result<()>>,
            timeout_duration: std::time::Duration,
        ) {
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("test timed out after {timeout_duration:?}")
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    }
}

fn parse_timeout(attr: TokenStream2) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }

    let secs = if let Ok(lit) = syn::parse2::<LitInt>(attr.clone()) {
        lit.base10_parse::<u64>()?
    } else {
        let pair = syn::parse2::<MetaNameValue>(attr)?;
        if !pair.path.is_ident("secs") {
            return Err(syn::Error::new_spanned(
                &pair.path,
                "expected `secs = <integer>`",
            ));
        }
        match &pair.value {
            Expr::Lit(ExprLit {
                lit: Lit::Int(lit), ..
            }) => lit.base10_parse::<u64>()?,
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "timeout must be an integer number of seconds",
                ))
            }
        }
    };

    if secs == 0 {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "timeout must be greater than zero",
        ));
    }
    Ok(secs)
}

fn strip_test_attributes(attrs: Vec<Attribute>) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect()
}

fn is_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    match (segments.next(), segments.next(), segments.next()) {
        (Some(first), None, None) => first.ident == "test",
        (Some(first), Some(second), None) => first.ident == "tokio" && second.ident == "test",
        _ => false,
    }
}
