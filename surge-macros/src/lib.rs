use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, quote_spanned};
use syn::{spanned::Spanned, ItemFn};

/// Proc macro to denote a Transaction
///
/// Every call is timed and counted towards the `http_reqs`, `http_req_duration` and
/// `http_req_failed` metrics of the running scenario. The function must be `async` and
/// return something implementing `surge::transaction::TransactionOutcome`, such as a
/// `Result<T, E>` or a `surge::http::Response`.
///
/// # Example
/// ```ignore
/// use surge::prelude::*;
///
/// #[transaction]
/// async fn create_thing(base_url: &str) -> Response {
///     http::post(&format!("{base_url}/thing"), "{}", &Params::json()).await
/// }
/// ```
#[proc_macro_attribute]
pub fn transaction(attr: TokenStream, item: TokenStream) -> TokenStream {
    transaction_internal(attr, item).into()
}

fn transaction_internal(_attr: TokenStream, item: TokenStream) -> TokenStream2 {
    let input = match syn::parse::<ItemFn>(item) {
        Ok(input) => input,
        Err(err) => return err.to_compile_error(),
    };

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = input;

    if sig.asyncness.is_none() {
        return quote_spanned! {sig.span()=>
            compile_error!("#[transaction] can only be used on async functions");
        };
    }

    let stmts = &block.stmts;
    let name = &sig.ident;

    quote! {
        #(#attrs)* #vis #sig {
            ::surge::transaction::transaction_hook(
                ::surge::core::generate_labels!(#name),
                async move {
                    #(#stmts)*
                },
            )
            .await
        }
    }
}
