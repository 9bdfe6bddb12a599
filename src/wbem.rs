//! COM face of the interception layer. Everything here is glue between
//! the portable core (router, factory, config) and the wbem object
//! model the host process actually talks to.

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::debug;
use windows::core::{implement, IUnknown, Interface, Result, BSTR, GUID, HRESULT, PCWSTR};
use windows::Win32::Foundation::{E_FAIL, E_NOTIMPL, E_POINTER};
use windows::Win32::System::Com::{IClientSecurity, IClientSecurity_Impl};
use windows::Win32::System::Variant::{
    VARENUM, VARIANT, VARIANT_0_0, VARIANT_0_0_0, VT_BOOL, VT_BSTR, VT_I4, VT_UI4, VT_UI8,
};
use windows::Win32::System::Wmi::{
    IEnumWbemClassObject, IEnumWbemClassObject_Impl, IWbemCallResult, IWbemClassObject,
    IWbemClassObject_Impl, IWbemContext, IWbemLocator, IWbemLocator_Impl, IWbemObjectSink,
    IWbemQualifierSet, IWbemServices, IWbemServices_Impl, WbemLocator, WBEM_E_NOT_FOUND,
    WBEM_S_FALSE, WBEM_S_NO_MORE_DATA,
};

use crate::engine;
use crate::factory::{ObjectRef, PropertyValue, SyntheticObjectSet};
use crate::masquerade::QueryRouter;

// CIM type codes for the property schema.
const CIM_SINT32: i32 = 3;
const CIM_STRING: i32 = 8;
const CIM_BOOLEAN: i32 = 11;
const CIM_UINT32: i32 = 19;
const CIM_UINT64: i32 = 21;

fn variant_of(value: &PropertyValue) -> (VARIANT, i32) {
    unsafe {
        let mut var: VARIANT = std::mem::zeroed();
        let (inner, cim) = match value {
            PropertyValue::Str(s) => (
                VARIANT_0_0 {
                    vt: VARENUM(VT_BSTR.0),
                    wReserved1: 0,
                    wReserved2: 0,
                    wReserved3: 0,
                    Anonymous: VARIANT_0_0_0 {
                        bstrVal: ManuallyDrop::new(BSTR::from(s.as_str())),
                    },
                },
                CIM_STRING,
            ),
            PropertyValue::U32(v) => (
                VARIANT_0_0 {
                    vt: VARENUM(VT_UI4.0),
                    wReserved1: 0,
                    wReserved2: 0,
                    wReserved3: 0,
                    Anonymous: VARIANT_0_0_0 { ulVal: *v },
                },
                CIM_UINT32,
            ),
            PropertyValue::I32(v) => (
                VARIANT_0_0 {
                    vt: VARENUM(VT_I4.0),
                    wReserved1: 0,
                    wReserved2: 0,
                    wReserved3: 0,
                    Anonymous: VARIANT_0_0_0 { lVal: *v },
                },
                CIM_SINT32,
            ),
            PropertyValue::U64(v) => (
                VARIANT_0_0 {
                    vt: VARENUM(VT_UI8.0),
                    wReserved1: 0,
                    wReserved2: 0,
                    wReserved3: 0,
                    Anonymous: VARIANT_0_0_0 { ullVal: *v },
                },
                CIM_UINT64,
            ),
            PropertyValue::Bool(v) => (
                VARIANT_0_0 {
                    vt: VARENUM(VT_BOOL.0),
                    wReserved1: 0,
                    wReserved2: 0,
                    wReserved3: 0,
                    Anonymous: VARIANT_0_0_0 {
                        boolVal: windows::Win32::Foundation::VARIANT_BOOL(if *v {
                            -1
                        } else {
                            0
                        }),
                    },
                },
                CIM_BOOLEAN,
            ),
        };
        var.Anonymous.Anonymous = ManuallyDrop::new(inner);
        (var, cim)
    }
}

// --- SYNTHETIC CLASS OBJECT ---

/// One fabricated device instance behind the class-object contract.
/// Property reads, writes, deletes and enumeration are live against the
/// shared bag; the class/schema operations have no meaning for a purely
/// synthetic instance and answer E_NOTIMPL, same as they always have.
#[implement(IWbemClassObject)]
pub struct SyntheticClassObject {
    bag: ObjectRef,
    cursor: Mutex<usize>,
}

impl SyntheticClassObject {
    pub fn wrap(bag: ObjectRef) -> IWbemClassObject {
        SyntheticClassObject {
            bag,
            cursor: Mutex::new(0),
        }
        .into()
    }
}

#[allow(non_snake_case)]
impl IWbemClassObject_Impl for SyntheticClassObject_Impl {
    fn GetQualifierSet(&self) -> Result<IWbemQualifierSet> {
        Err(E_NOTIMPL.into())
    }

    fn Get(
        &self,
        wszname: &PCWSTR,
        _lflags: i32,
        pval: *mut VARIANT,
        ptype: *mut i32,
        plflavor: *mut i32,
    ) -> Result<()> {
        if wszname.is_null() || pval.is_null() {
            return Err(E_POINTER.into());
        }
        let name = unsafe { wszname.to_string() }.map_err(|_| windows::core::Error::from(E_FAIL))?;
        match self.bag.get(&name) {
            Some(value) => {
                let (var, cim) = variant_of(&value);
                unsafe {
                    std::ptr::write(pval, var);
                    if !ptype.is_null() {
                        *ptype = cim;
                    }
                    if !plflavor.is_null() {
                        *plflavor = 0;
                    }
                }
                Ok(())
            }
            None => Err(HRESULT(WBEM_E_NOT_FOUND.0).into()),
        }
    }

    fn Put(&self, wszname: &PCWSTR, _lflags: i32, pval: *const VARIANT, _r#type: i32) -> Result<()> {
        if wszname.is_null() {
            return Err(E_POINTER.into());
        }
        let name = unsafe { wszname.to_string() }.map_err(|_| windows::core::Error::from(E_FAIL))?;
        let value = unsafe { read_variant(pval)? };
        self.bag.put(&name, value);
        Ok(())
    }

    fn Delete(&self, wszname: &PCWSTR) -> Result<()> {
        let name = unsafe { wszname.to_string() }.map_err(|_| windows::core::Error::from(E_FAIL))?;
        if self.bag.delete(&name) {
            Ok(())
        } else {
            Err(HRESULT(WBEM_E_NOT_FOUND.0).into())
        }
    }

    fn GetNames(
        &self,
        _wszqualifiername: &PCWSTR,
        _lflags: i32,
        _pqualifierval: *const VARIANT,
    ) -> Result<*mut windows::Win32::System::Com::SAFEARRAY> {
        Err(E_NOTIMPL.into())
    }

    fn BeginEnumeration(&self, _lenumflags: i32) -> Result<()> {
        *self.cursor.lock().expect("cursor lock poisoned") = 0;
        Ok(())
    }

    fn Next(
        &self,
        _lflags: i32,
        pstrname: *mut BSTR,
        pval: *mut VARIANT,
        ptype: *mut i32,
        plflavor: *mut i32,
    ) -> Result<()> {
        let mut cursor = self.cursor.lock().expect("cursor lock poisoned");
        let entries = self.bag.entries();
        let Some((name, value)) = entries.get(*cursor) else {
            return Err(HRESULT(WBEM_S_NO_MORE_DATA.0).into());
        };
        *cursor += 1;
        let (var, cim) = variant_of(value);
        unsafe {
            if !pstrname.is_null() {
                // Out parameter arrives uninitialized; a plain store
                // must not drop whatever bytes sit there.
                std::ptr::write(pstrname, BSTR::from(name.as_str()));
            }
            if !pval.is_null() {
                std::ptr::write(pval, var);
            }
            if !ptype.is_null() {
                *ptype = cim;
            }
            if !plflavor.is_null() {
                *plflavor = 0;
            }
        }
        Ok(())
    }

    fn EndEnumeration(&self) -> Result<()> {
        Ok(())
    }

    fn GetPropertyQualifierSet(&self, _wszproperty: &PCWSTR) -> Result<IWbemQualifierSet> {
        Err(E_NOTIMPL.into())
    }

    fn Clone(&self) -> Result<IWbemClassObject> {
        Err(E_NOTIMPL.into())
    }

    fn GetObjectText(&self, _lflags: i32) -> Result<BSTR> {
        Err(E_NOTIMPL.into())
    }

    fn SpawnDerivedClass(&self, _lflags: i32) -> Result<IWbemClassObject> {
        Err(E_NOTIMPL.into())
    }

    fn SpawnInstance(&self, _lflags: i32) -> Result<IWbemClassObject> {
        Err(E_NOTIMPL.into())
    }

    fn CompareTo(&self, _lflags: i32, _pcompareto: Option<&IWbemClassObject>) -> Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn GetPropertyOrigin(&self, _wszname: &PCWSTR) -> Result<BSTR> {
        Err(E_NOTIMPL.into())
    }

    fn InheritsFrom(&self, _strancestor: &PCWSTR) -> Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn GetMethod(
        &self,
        _wszname: &PCWSTR,
        _lflags: i32,
        _ppinsignature: windows::core::OutRef<IWbemClassObject>,
        _ppoutsignature: windows::core::OutRef<IWbemClassObject>,
    ) -> Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn PutMethod(
        &self,
        _wszname: &PCWSTR,
        _lflags: i32,
        _pinsignature: Option<&IWbemClassObject>,
        _poutsignature: Option<&IWbemClassObject>,
    ) -> Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn DeleteMethod(&self, _wszname: &PCWSTR) -> Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn BeginMethodEnumeration(&self, _lenumflags: i32) -> Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn NextMethod(
        &self,
        _lflags: i32,
        _pstrname: *mut BSTR,
        _ppinsignature: windows::core::OutRef<IWbemClassObject>,
        _ppoutsignature: windows::core::OutRef<IWbemClassObject>,
    ) -> Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn EndMethodEnumeration(&self) -> Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn GetMethodQualifierSet(&self, _wszmethod: &PCWSTR) -> Result<IWbemQualifierSet> {
        Err(E_NOTIMPL.into())
    }

    fn GetMethodOrigin(&self, _wszmethodname: &PCWSTR) -> Result<BSTR> {
        Err(E_NOTIMPL.into())
    }
}

unsafe fn read_variant(pval: *const VARIANT) -> Result<PropertyValue> {
    if pval.is_null() {
        return Ok(PropertyValue::Str(String::new()));
    }
    let var = &*pval;
    let inner = &var.Anonymous.Anonymous;
    let value = match VARENUM(inner.vt.0) {
        VT_BSTR => PropertyValue::Str(inner.Anonymous.bstrVal.to_string()),
        VT_UI4 => PropertyValue::U32(inner.Anonymous.ulVal),
        VT_I4 => PropertyValue::I32(inner.Anonymous.lVal),
        VT_UI8 => PropertyValue::U64(inner.Anonymous.ullVal),
        VT_BOOL => PropertyValue::Bool(inner.Anonymous.boolVal.as_bool()),
        _ => PropertyValue::Str(String::new()),
    };
    Ok(value)
}

// --- SYNTHETIC ENUMERATOR ---

/// The result-set contract over a `SyntheticObjectSet`: forward-only
/// batch pulls, skip, reset, and a clone that restarts from the top.
#[implement(IEnumWbemClassObject)]
pub struct SyntheticEnum {
    set: Mutex<SyntheticObjectSet>,
}

impl SyntheticEnum {
    pub fn wrap(set: SyntheticObjectSet) -> IEnumWbemClassObject {
        SyntheticEnum {
            set: Mutex::new(set),
        }
        .into()
    }
}

#[allow(non_snake_case)]
impl IEnumWbemClassObject_Impl for SyntheticEnum_Impl {
    fn Reset(&self) -> Result<()> {
        self.set.lock().expect("set lock poisoned").reset();
        Ok(())
    }

    fn Next(
        &self,
        _ltimeout: i32,
        ucount: u32,
        apobjects: *mut Option<IWbemClassObject>,
        pureturned: *mut u32,
    ) -> Result<()> {
        if apobjects.is_null() || pureturned.is_null() {
            return Err(E_POINTER.into());
        }
        let batch = self
            .set
            .lock()
            .expect("set lock poisoned")
            .pull(ucount as usize);
        let returned = batch.len() as u32;
        unsafe {
            for (i, bag) in batch.into_iter().enumerate() {
                std::ptr::write(apobjects.add(i), Some(SyntheticClassObject::wrap(bag)));
            }
            *pureturned = returned;
        }
        if returned == ucount {
            Ok(())
        } else {
            Err(HRESULT(WBEM_S_FALSE.0).into())
        }
    }

    fn NextAsync(&self, _ucount: u32, _psink: Option<&IWbemObjectSink>) -> Result<()> {
        Err(E_NOTIMPL.into())
    }

    fn Clone(&self) -> Result<IEnumWbemClassObject> {
        let copy = self.set.lock().expect("set lock poisoned").duplicate();
        Ok(SyntheticEnum::wrap(copy))
    }

    fn Skip(&self, _ltimeout: i32, ncount: u32) -> Result<()> {
        self.set
            .lock()
            .expect("set lock poisoned")
            .skip(ncount as usize);
        Ok(())
    }
}

// --- SERVICE PROXY ---

/// Stand-in for a connected inventory service. Ad hoc queries run
/// through the router; every other operation, and every capability the
/// proxy does not claim for itself, belongs to the wrapped real object.
#[implement(IWbemServices, IClientSecurity)]
pub struct ServicesMasquerade {
    real: IWbemServices,
}

impl ServicesMasquerade {
    pub fn wrap(real: IWbemServices) -> IWbemServices {
        ServicesMasquerade { real }.into()
    }
}

#[allow(non_snake_case)]
impl IWbemServices_Impl for ServicesMasquerade_Impl {
    fn OpenNamespace(
        &self,
        strnamespace: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        ppworkingnamespace: windows::core::OutRef<IWbemServices>,
        ppresult: windows::core::OutRef<IWbemCallResult>,
    ) -> Result<()> {
        let mut namespace: Option<IWbemServices> = None;
        let mut result: Option<IWbemCallResult> = None;
        unsafe {
            self.real.OpenNamespace(
                strnamespace,
                lflags,
                pctx,
                Some(&mut namespace),
                Some(&mut result),
            )?;
        }
        let _ = ppresult.write(result);
        ppworkingnamespace.write(namespace)
    }

    fn CancelAsyncCall(&self, psink: Option<&IWbemObjectSink>) -> Result<()> {
        unsafe { self.real.CancelAsyncCall(psink) }
    }

    fn QueryObjectSink(&self, lflags: i32) -> Result<IWbemObjectSink> {
        unsafe { self.real.QueryObjectSink(lflags) }
    }

    fn GetObject(
        &self,
        strobjectpath: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        ppobject: windows::core::OutRef<IWbemClassObject>,
        ppcallresult: windows::core::OutRef<IWbemCallResult>,
    ) -> Result<()> {
        let mut object: Option<IWbemClassObject> = None;
        let mut result: Option<IWbemCallResult> = None;
        unsafe {
            self.real
                .GetObject(strobjectpath, lflags, pctx, Some(&mut object), Some(&mut result))?;
        }
        let _ = ppcallresult.write(result);
        ppobject.write(object)
    }

    fn GetObjectAsync(
        &self,
        strobjectpath: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real
                .GetObjectAsync(strobjectpath, lflags, pctx, presponsehandler)
        }
    }

    fn PutClass(
        &self,
        pobject: Option<&IWbemClassObject>,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        ppcallresult: windows::core::OutRef<IWbemCallResult>,
    ) -> Result<()> {
        let mut result: Option<IWbemCallResult> = None;
        unsafe {
            self.real.PutClass(pobject, lflags, pctx, Some(&mut result))?;
        }
        let _ = ppcallresult.write(result);
        Ok(())
    }

    fn PutClassAsync(
        &self,
        pobject: Option<&IWbemClassObject>,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real
                .PutClassAsync(pobject, lflags, pctx, presponsehandler)
        }
    }

    fn DeleteClass(
        &self,
        strclass: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        ppcallresult: windows::core::OutRef<IWbemCallResult>,
    ) -> Result<()> {
        let mut result: Option<IWbemCallResult> = None;
        unsafe {
            self.real.DeleteClass(strclass, lflags, pctx, Some(&mut result))?;
        }
        let _ = ppcallresult.write(result);
        Ok(())
    }

    fn DeleteClassAsync(
        &self,
        strclass: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real
                .DeleteClassAsync(strclass, lflags, pctx, presponsehandler)
        }
    }

    fn CreateClassEnum(
        &self,
        strsuperclass: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
    ) -> Result<IEnumWbemClassObject> {
        unsafe { self.real.CreateClassEnum(strsuperclass, lflags, pctx) }
    }

    fn CreateClassEnumAsync(
        &self,
        strsuperclass: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real
                .CreateClassEnumAsync(strsuperclass, lflags, pctx, presponsehandler)
        }
    }

    fn PutInstance(
        &self,
        pinst: Option<&IWbemClassObject>,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        ppcallresult: windows::core::OutRef<IWbemCallResult>,
    ) -> Result<()> {
        let mut result: Option<IWbemCallResult> = None;
        unsafe {
            self.real.PutInstance(pinst, lflags, pctx, Some(&mut result))?;
        }
        let _ = ppcallresult.write(result);
        Ok(())
    }

    fn PutInstanceAsync(
        &self,
        pinst: Option<&IWbemClassObject>,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real
                .PutInstanceAsync(pinst, lflags, pctx, presponsehandler)
        }
    }

    fn DeleteInstance(
        &self,
        strobjectpath: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        ppcallresult: windows::core::OutRef<IWbemCallResult>,
    ) -> Result<()> {
        let mut result: Option<IWbemCallResult> = None;
        unsafe {
            self.real
                .DeleteInstance(strobjectpath, lflags, pctx, Some(&mut result))?;
        }
        let _ = ppcallresult.write(result);
        Ok(())
    }

    fn DeleteInstanceAsync(
        &self,
        strobjectpath: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real
                .DeleteInstanceAsync(strobjectpath, lflags, pctx, presponsehandler)
        }
    }

    fn CreateInstanceEnum(
        &self,
        strfilter: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
    ) -> Result<IEnumWbemClassObject> {
        unsafe { self.real.CreateInstanceEnum(strfilter, lflags, pctx) }
    }

    fn CreateInstanceEnumAsync(
        &self,
        strfilter: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real
                .CreateInstanceEnumAsync(strfilter, lflags, pctx, presponsehandler)
        }
    }

    /// The one interposed operation. Recognized categories never reach
    /// the real service; everything else does, failures included.
    fn ExecQuery(
        &self,
        strquerylanguage: &BSTR,
        strquery: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
    ) -> Result<IEnumWbemClassObject> {
        let query = strquery.to_string();
        if let Some(category) = QueryRouter::classify(&query) {
            if let Some(engine) = engine::instance() {
                debug!(?category, "query answered synthetically");
                return Ok(SyntheticEnum::wrap(engine.synthesize(category)));
            }
        }
        unsafe { self.real.ExecQuery(strquerylanguage, strquery, lflags, pctx) }
    }

    fn ExecQueryAsync(
        &self,
        strquerylanguage: &BSTR,
        strquery: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real
                .ExecQueryAsync(strquerylanguage, strquery, lflags, pctx, presponsehandler)
        }
    }

    fn ExecNotificationQuery(
        &self,
        strquerylanguage: &BSTR,
        strquery: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
    ) -> Result<IEnumWbemClassObject> {
        unsafe {
            self.real
                .ExecNotificationQuery(strquerylanguage, strquery, lflags, pctx)
        }
    }

    fn ExecNotificationQueryAsync(
        &self,
        strquerylanguage: &BSTR,
        strquery: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real.ExecNotificationQueryAsync(
                strquerylanguage,
                strquery,
                lflags,
                pctx,
                presponsehandler,
            )
        }
    }

    fn ExecMethod(
        &self,
        strobjectpath: &BSTR,
        strmethodname: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        pinparams: Option<&IWbemClassObject>,
        ppoutparams: windows::core::OutRef<IWbemClassObject>,
        ppcallresult: windows::core::OutRef<IWbemCallResult>,
    ) -> Result<()> {
        let mut out_params: Option<IWbemClassObject> = None;
        let mut result: Option<IWbemCallResult> = None;
        unsafe {
            self.real.ExecMethod(
                strobjectpath,
                strmethodname,
                lflags,
                pctx,
                pinparams,
                Some(&mut out_params),
                Some(&mut result),
            )?;
        }
        let _ = ppcallresult.write(result);
        let _ = ppoutparams.write(out_params);
        Ok(())
    }

    fn ExecMethodAsync(
        &self,
        strobjectpath: &BSTR,
        strmethodname: &BSTR,
        lflags: i32,
        pctx: Option<&IWbemContext>,
        pinparams: Option<&IWbemClassObject>,
        presponsehandler: Option<&IWbemObjectSink>,
    ) -> Result<()> {
        unsafe {
            self.real.ExecMethodAsync(
                strobjectpath,
                strmethodname,
                lflags,
                pctx,
                pinparams,
                presponsehandler,
            )
        }
    }
}

// Security-capability negotiation lands here when a caller asks the
// proxy for IClientSecurity. Each operation rides the real object's own
// security interface so blanket settings reach the genuine RPC channel.
#[allow(non_snake_case)]
impl IClientSecurity_Impl for ServicesMasquerade_Impl {
    fn QueryBlanket(
        &self,
        pproxy: Option<&IUnknown>,
        pauthnsvc: *mut u32,
        pauthzsvc: *mut u32,
        pserverprincname: *mut windows::core::PWSTR,
        pauthnlevel: *mut u32,
        pimplevel: *mut u32,
        pauthinfo: *mut *mut c_void,
        pcapabilites: *mut u32,
    ) -> Result<()> {
        let real: IClientSecurity = self.real.cast()?;
        unsafe {
            real.QueryBlanket(
                pproxy,
                pauthnsvc,
                pauthzsvc,
                pserverprincname,
                pauthnlevel,
                pimplevel,
                pauthinfo,
                pcapabilites,
            )
        }
    }

    fn SetBlanket(
        &self,
        pproxy: Option<&IUnknown>,
        dwauthnsvc: u32,
        dwauthzsvc: u32,
        pserverprincname: &windows::core::PCWSTR,
        dwauthnlevel: windows::Win32::System::Com::RPC_C_AUTHN_LEVEL,
        dwimplevel: windows::Win32::System::Com::RPC_C_IMP_LEVEL,
        pauthinfo: *const c_void,
        dwcapabilities: u32,
    ) -> Result<()> {
        match self.real.cast::<IClientSecurity>() {
            Ok(real) => unsafe {
                real.SetBlanket(
                    pproxy,
                    dwauthnsvc,
                    dwauthzsvc,
                    *pserverprincname,
                    dwauthnlevel,
                    dwimplevel,
                    pauthinfo,
                    dwcapabilities,
                )
            },
            // An in-process real service has no RPC channel to secure.
            Err(_) => Ok(()),
        }
    }

    fn CopyProxy(&self, pproxy: Option<&IUnknown>) -> Result<IUnknown> {
        let real: IClientSecurity = self.real.cast()?;
        unsafe { real.CopyProxy(pproxy) }
    }
}

// --- LOCATOR PROXY ---

/// Wraps the namespace connector so every service handle the host ever
/// obtains is already interceptable before its first call.
#[implement(IWbemLocator)]
pub struct LocatorMasquerade {
    real: IWbemLocator,
}

impl LocatorMasquerade {
    pub fn wrap(real: IWbemLocator) -> IWbemLocator {
        LocatorMasquerade { real }.into()
    }
}

#[allow(non_snake_case)]
impl IWbemLocator_Impl for LocatorMasquerade_Impl {
    fn ConnectServer(
        &self,
        strnetworkresource: &BSTR,
        struser: &BSTR,
        strpassword: &BSTR,
        strlocale: &BSTR,
        lsecurityflags: i32,
        strauthority: &BSTR,
        pctx: Option<&IWbemContext>,
    ) -> Result<IWbemServices> {
        // Real connection first; its failure is the caller's answer.
        let real_service = unsafe {
            self.real.ConnectServer(
                strnetworkresource,
                struser,
                strpassword,
                strlocale,
                lsecurityflags,
                strauthority,
                pctx,
            )?
        };
        debug!(namespace = %strnetworkresource, "connected namespace wrapped");
        Ok(ServicesMasquerade::wrap(real_service))
    }
}

// --- HOOKED FLAT ENTRY POINTS ---

pub static ORIG_CO_CREATE_INSTANCE: AtomicUsize = AtomicUsize::new(0);
pub static ORIG_CO_SET_PROXY_BLANKET: AtomicUsize = AtomicUsize::new(0);

type CoCreateInstanceFn = unsafe extern "system" fn(
    *const GUID,
    *mut c_void,
    u32,
    *const GUID,
    *mut *mut c_void,
) -> HRESULT;

type CoSetProxyBlanketFn = unsafe extern "system" fn(
    *mut c_void,
    u32,
    u32,
    *mut u16,
    u32,
    u32,
    *mut c_void,
    u32,
) -> HRESULT;

/// Interposed CoCreateInstance: completes the real creation, then swaps
/// a freshly created namespace connector for its masquerade.
pub unsafe extern "system" fn hooked_co_create_instance(
    rclsid: *const GUID,
    punkouter: *mut c_void,
    dwclscontext: u32,
    riid: *const GUID,
    ppv: *mut *mut c_void,
) -> HRESULT {
    let orig = ORIG_CO_CREATE_INSTANCE.load(Ordering::Relaxed);
    if orig == 0 {
        return E_FAIL;
    }
    let real: CoCreateInstanceFn = std::mem::transmute(orig);
    let hr = real(rclsid, punkouter, dwclscontext, riid, ppv);

    if hr.is_ok()
        && !rclsid.is_null()
        && !riid.is_null()
        && !ppv.is_null()
        && *rclsid == WbemLocator
        && *riid == IWbemLocator::IID
        && !(*ppv).is_null()
    {
        let original = IWbemLocator::from_raw(*ppv);
        let wrapped = LocatorMasquerade::wrap(original);
        *ppv = wrapped.into_raw();
        debug!("namespace connector wrapped at creation");
    }
    hr
}

/// Interposed CoSetProxyBlanket: wrapped services succeed immediately,
/// the masquerade forwards per call so there is no channel of its own
/// to secure. Every other proxy goes to the real routine.
pub unsafe extern "system" fn hooked_co_set_proxy_blanket(
    pproxy: *mut c_void,
    dwauthnsvc: u32,
    dwauthzsvc: u32,
    pserverprincname: *mut u16,
    dwauthnlevel: u32,
    dwimplevel: u32,
    pauthinfo: *mut c_void,
    dwcapabilities: u32,
) -> HRESULT {
    if let Some(unknown) = IUnknown::from_raw_borrowed(&pproxy) {
        if unknown.cast::<IWbemServices>().is_ok() {
            return HRESULT(0);
        }
    }
    let orig = ORIG_CO_SET_PROXY_BLANKET.load(Ordering::Relaxed);
    if orig == 0 {
        return E_FAIL;
    }
    let real: CoSetProxyBlanketFn = std::mem::transmute(orig);
    real(
        pproxy,
        dwauthnsvc,
        dwauthzsvc,
        pserverprincname,
        dwauthnlevel,
        dwimplevel,
        pauthinfo,
        dwcapabilities,
    )
}
